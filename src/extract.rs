//! Archive extraction and layout normalization
//!
//! Bundles are unpacked by invoking the system decompression tools, and the
//! resulting tree is flattened when the archive wraps its contents in a
//! single directory named after the archive stem (a common packaging
//! convention). Extraction faults are reported distinctly from download
//! faults so the installer can attribute them correctly.

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Strip the archive suffix from a bundle file name
#[must_use]
pub fn archive_stem(file_name: &str) -> &str {
    for suffix in [".tar.gz", ".tgz", ".tar.bz2", ".zip"] {
        if let Some(stem) = file_name.strip_suffix(suffix) {
            return stem;
        }
    }
    file_name
}

/// Unpack `archive` into `target`, which is created if absent
///
/// # Errors
///
/// Returns [`Error::Extraction`] for unsupported formats, tool spawn
/// failures, and non-zero tool exits; [`Error::Filesystem`] if the target
/// directory cannot be created
pub async fn extract(archive: &Path, target: &Path) -> Result<()> {
    tokio::fs::create_dir_all(target)
        .await
        .map_err(|e| Error::Filesystem(format!("failed to create {}: {e}", target.display())))?;

    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Extraction(format!("invalid archive name: {}", archive.display())))?;

    let archive_str = archive.to_string_lossy().to_string();
    let target_str = target.to_string_lossy().to_string();

    let (tool, args): (&str, Vec<&str>) = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ("tar", vec!["xzf", &archive_str, "-C", &target_str])
    } else if name.ends_with(".tar.bz2") {
        ("tar", vec!["xjf", &archive_str, "-C", &target_str])
    } else if name.ends_with(".zip") {
        ("unzip", vec!["-o", &archive_str, "-d", &target_str])
    } else {
        return Err(Error::Extraction(format!("unsupported archive format: {name}")));
    };

    debug!(tool, archive = %archive.display(), target = %target.display(), "extracting bundle");

    let output = tokio::process::Command::new(tool)
        .args(&args)
        .output()
        .await
        .map_err(|e| Error::Extraction(format!("failed to run {tool}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Extraction(format!(
            "{tool} exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    Ok(())
}

/// Flatten a single wrapper directory named after the archive stem
///
/// If `target` contains exactly one entry, that entry is a directory, and
/// its name matches `stem`, its contents are moved up one level and the
/// empty wrapper is removed. Consumers can then assume a flat layout.
///
/// # Errors
///
/// Returns [`Error::Filesystem`] if directory listing or the moves fail
pub async fn normalize_layout(target: &Path, stem: &str) -> Result<()> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(target)
        .await
        .map_err(|e| Error::Filesystem(format!("failed to read {}: {e}", target.display())))?;
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| Error::Filesystem(format!("failed to read {}: {e}", target.display())))?
    {
        entries.push(entry);
    }

    if entries.len() != 1 {
        return Ok(());
    }

    let wrapper = &entries[0];
    let is_dir = wrapper
        .file_type()
        .await
        .map_err(|e| Error::Filesystem(format!("failed to stat wrapper: {e}")))?
        .is_dir();
    if !is_dir || wrapper.file_name().to_string_lossy() != stem {
        return Ok(());
    }

    let wrapper_path = wrapper.path();
    debug!(wrapper = %wrapper_path.display(), "flattening wrapper directory");

    let mut inner = tokio::fs::read_dir(&wrapper_path)
        .await
        .map_err(|e| Error::Filesystem(format!("failed to read {}: {e}", wrapper_path.display())))?;
    while let Some(child) = inner
        .next_entry()
        .await
        .map_err(|e| Error::Filesystem(format!("failed to read {}: {e}", wrapper_path.display())))?
    {
        let from = child.path();
        let to = target.join(child.file_name());
        tokio::fs::rename(&from, &to).await.map_err(|e| {
            Error::Filesystem(format!(
                "failed to move {} to {}: {e}",
                from.display(),
                to.display()
            ))
        })?;
    }

    tokio::fs::remove_dir(&wrapper_path)
        .await
        .map_err(|e| Error::Filesystem(format!("failed to remove {}: {e}", wrapper_path.display())))?;

    Ok(())
}
