//! Companion token-list recovery
//!
//! A voice is only usable when a token list sits next to its model file.
//! When the authoritative sidecar cannot be fetched or parsed, recovery is
//! attempted in order: structural parse of whatever was fetched, a copy from
//! an installed voice of the same format, then a minimal placeholder. The
//! ladder never raises a hard error for metadata unavailability; a degraded
//! token list beats a failed installation.

use std::path::Path;

use tracing::{debug, info};

use crate::catalog::{Catalog, VoiceDescriptor};
use crate::error::{Error, Result};
use crate::installer::TOKENS_FILE;

/// Minimal schema-valid vocabulary, sufficient for the synthesis engine to
/// initialize at reduced output quality
const PLACEHOLDER_TOKENS: &[&str] = &[
    "_", "^", "$", " ", "!", "'", ",", "-", ".", "?", "a", "b", "c", "d", "e", "f", "g", "h",
    "i", "j", "k", "l", "m", "n", "o", "p", "q", "r", "s", "t", "u", "v", "w", "x", "y", "z",
];

/// Where a recovered token list came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionSource {
    /// Parsed out of the fetched sidecar body
    Sidecar,
    /// Copied from another installed voice of the same format
    Sibling(String),
    /// Synthesized placeholder vocabulary
    Placeholder,
}

/// Produce a token list at `dest`, consuming the fetched sidecar body when
/// one is available
///
/// # Errors
///
/// Returns [`Error::Filesystem`] only when the recovered list cannot be
/// written; metadata unavailability itself is always absorbed
pub async fn recover_tokens(
    fetched: Option<&str>,
    voice: &VoiceDescriptor,
    catalog: &Catalog,
    voices_dir: &Path,
    dest: &Path,
) -> Result<CompanionSource> {
    // 1. Structural parse of the fetched content
    if let Some(body) = fetched {
        match parse_sidecar(body) {
            Some(tokens) => {
                write_tokens(&tokens, dest).await?;
                return Ok(CompanionSource::Sidecar);
            }
            None => {
                debug!(voice_id = %voice.id, "sidecar body has no usable token list");
            }
        }
    }

    // 2. Copy from an installed voice of the same format
    for sibling in catalog.all() {
        if sibling.id == voice.id || sibling.format != voice.format {
            continue;
        }
        let candidate = voices_dir.join(&sibling.id).join(TOKENS_FILE);
        if candidate.exists() {
            tokio::fs::copy(&candidate, dest).await.map_err(|e| {
                Error::Filesystem(format!(
                    "failed to copy {} to {}: {e}",
                    candidate.display(),
                    dest.display()
                ))
            })?;
            info!(voice_id = %voice.id, sibling = %sibling.id, "borrowed token list from installed voice");
            return Ok(CompanionSource::Sibling(sibling.id.clone()));
        }
    }

    // 3. Minimal placeholder
    let tokens: Vec<String> = PLACEHOLDER_TOKENS.iter().map(ToString::to_string).collect();
    write_tokens(&tokens, dest).await?;
    info!(voice_id = %voice.id, "synthesized placeholder token list");
    Ok(CompanionSource::Placeholder)
}

/// Extract the `tokens` array from a sidecar JSON body
fn parse_sidecar(body: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let tokens: Vec<String> = value
        .get("tokens")?
        .as_array()?
        .iter()
        .filter_map(|t| t.as_str().map(ToString::to_string))
        .collect();
    if tokens.is_empty() { None } else { Some(tokens) }
}

/// Write a token list as `token index` lines
async fn write_tokens(tokens: &[String], dest: &Path) -> Result<()> {
    let mut out = String::new();
    for (index, token) in tokens.iter().enumerate() {
        out.push_str(token);
        out.push(' ');
        out.push_str(&index.to_string());
        out.push('\n');
    }
    tokio::fs::write(dest, out)
        .await
        .map_err(|e| Error::Filesystem(format!("failed to write {}: {e}", dest.display())))
}
