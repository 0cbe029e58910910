//! Voice install state machine
//!
//! The installer owns all per-voice install state and the on-disk voice
//! directory tree. Every state transition for a voice goes through one
//! guarded map, so transitions per id are linearized; distinct ids proceed
//! independently, one background task per in-flight install.
//!
//! ```text
//! NotInstalled --request_install--> Installing --success--> Installed
//! Installing --cancel--> NotInstalled
//! Installing --failure--> Failed
//! Failed --request_install--> Installing
//! Installed --uninstall--> NotInstalled
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, VoiceDescriptor};
use crate::config::ManagerConfig;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::{extract, fallback};

/// Canonical primary model file name inside an installed voice directory
pub const MODEL_FILE: &str = "model.onnx";

/// Canonical companion token-list file name
pub const TOKENS_FILE: &str = "tokens.txt";

/// Capacity of the state event channel
const EVENT_CAPACITY: usize = 256;

/// Install state of a single voice
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceState {
    /// No files on disk for this voice
    NotInstalled,
    /// An acquisition task is in flight; `progress` runs 0.0..=1.0
    Installing { progress: f32 },
    /// Model and token files exist at the canonical path
    Installed,
    /// The last attempt failed; a new request restarts the pipeline
    Failed { reason: String },
}

impl VoiceState {
    /// Whether this is a terminal state for an install attempt
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Installed | Self::Failed { .. } | Self::NotInstalled)
    }
}

/// A state transition published to observers
#[derive(Debug, Clone)]
pub struct StateEvent {
    /// Voice the transition applies to
    pub voice_id: String,
    /// New state
    pub state: VoiceState,
}

/// Canonical file locations of an installed voice
#[derive(Debug, Clone)]
pub struct VoicePaths {
    /// Primary model file
    pub model: PathBuf,
    /// Companion token list
    pub tokens: PathBuf,
}

struct VoiceEntry {
    state: VoiceState,
    cancel: Option<CancellationToken>,
}

/// Orchestrates download, extraction, and companion recovery per voice
pub struct VoiceInstaller {
    config: ManagerConfig,
    catalog: Catalog,
    downloader: Downloader,
    entries: RwLock<HashMap<String, VoiceEntry>>,
    events: broadcast::Sender<StateEvent>,
    shared_data_guard: Mutex<()>,
}

impl VoiceInstaller {
    /// Create an installer and seed state for every catalog entry
    ///
    /// Voices whose model and token files already exist on disk start as
    /// `Installed`; directories missing either file are swept so a stale
    /// partial install can never be mistaken for a valid one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Filesystem`] if the voices directory cannot be
    /// created, [`Error::Network`] if the HTTP client cannot be built
    pub fn new(config: ManagerConfig, catalog: Catalog) -> Result<Self> {
        let voices_dir = config.voices_dir();
        std::fs::create_dir_all(&voices_dir).map_err(|e| {
            Error::Filesystem(format!("failed to create {}: {e}", voices_dir.display()))
        })?;

        let downloader = Downloader::new(config.download_timeout)?;

        let mut entries = HashMap::new();
        for voice in catalog.all() {
            let dir = voices_dir.join(&voice.id);
            let complete = dir.join(MODEL_FILE).exists() && dir.join(TOKENS_FILE).exists();
            let state = if complete {
                VoiceState::Installed
            } else {
                if dir.exists() {
                    debug!(voice_id = %voice.id, "sweeping stale partial install");
                    if let Err(e) = std::fs::remove_dir_all(&dir) {
                        warn!(voice_id = %voice.id, error = %e, "failed to sweep partial install");
                    }
                }
                VoiceState::NotInstalled
            };
            entries.insert(voice.id.clone(), VoiceEntry { state, cancel: None });
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            catalog,
            downloader,
            entries: RwLock::new(entries),
            events,
            shared_data_guard: Mutex::new(()),
        })
    }

    /// The catalog this installer serves
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Subscribe to state transitions for all voices
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Current state of a voice
    pub async fn state(&self, id: &str) -> VoiceState {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .map_or(VoiceState::NotInstalled, |e| e.state.clone())
    }

    /// Whether both required files of a voice are installed
    pub async fn is_installed(&self, id: &str) -> bool {
        matches!(self.state(id).await, VoiceState::Installed)
    }

    /// Canonical file locations; `Some` only while the voice is installed
    pub async fn resolve_paths(&self, id: &str) -> Option<VoicePaths> {
        if !self.is_installed(id).await {
            return None;
        }
        let dir = self.voice_dir(id);
        Some(VoicePaths {
            model: dir.join(MODEL_FILE),
            tokens: dir.join(TOKENS_FILE),
        })
    }

    /// On-disk size of an installed voice
    pub async fn installed_size(&self, id: &str) -> Option<u64> {
        if !self.is_installed(id).await {
            return None;
        }
        dir_size(&self.voice_dir(id)).ok()
    }

    /// Request installation of a voice
    ///
    /// Installed voices are a no-op; a voice already installing attaches to
    /// the in-flight task rather than starting a second fetch. In both
    /// cases the returned receiver observes subsequent transitions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownVoice`] for ids not in the catalog
    pub async fn request_install(
        self: &Arc<Self>,
        id: &str,
    ) -> Result<broadcast::Receiver<StateEvent>> {
        let voice = self
            .catalog
            .find(id)
            .ok_or_else(|| Error::UnknownVoice(id.to_string()))?
            .clone();

        // Subscribe before publishing Installing so callers see the full
        // transition sequence.
        let rx = self.events.subscribe();

        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(voice.id.clone())
            .or_insert(VoiceEntry { state: VoiceState::NotInstalled, cancel: None });

        match &entry.state {
            VoiceState::Installed => {
                debug!(voice_id = %voice.id, "already installed");
                return Ok(rx);
            }
            VoiceState::Installing { .. } => {
                debug!(voice_id = %voice.id, "attaching to in-flight install");
                return Ok(rx);
            }
            VoiceState::NotInstalled | VoiceState::Failed { .. } => {}
        }

        let cancel = CancellationToken::new();
        entry.state = VoiceState::Installing { progress: 0.0 };
        entry.cancel = Some(cancel.clone());
        let _ = self.events.send(StateEvent {
            voice_id: voice.id.clone(),
            state: entry.state.clone(),
        });
        drop(entries);

        info!(voice_id = %voice.id, "starting install");
        let installer = Arc::clone(self);
        tokio::spawn(async move {
            installer.run_pipeline(voice, cancel).await;
        });

        Ok(rx)
    }

    /// Cancel an in-flight install
    ///
    /// Only meaningful while installing; otherwise a no-op. The pipeline
    /// task removes partial artifacts and transitions to `NotInstalled`.
    pub async fn cancel_install(&self, id: &str) {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(id) {
            if matches!(entry.state, VoiceState::Installing { .. }) {
                if let Some(cancel) = &entry.cancel {
                    info!(voice_id = id, "cancelling install");
                    cancel.cancel();
                }
            }
        }
    }

    /// Remove an installed voice and return it to `NotInstalled`
    ///
    /// Only meaningful while installed; otherwise a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownVoice`] for ids not in the catalog,
    /// [`Error::NotRemovable`] for the bundled default, and
    /// [`Error::Filesystem`] if the directory cannot be removed
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        let voice = self
            .catalog
            .find(id)
            .ok_or_else(|| Error::UnknownVoice(id.to_string()))?;
        if !voice.removable {
            return Err(Error::NotRemovable(id.to_string()));
        }

        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(id) else {
            return Ok(());
        };
        if entry.state != VoiceState::Installed {
            return Ok(());
        }

        let dir = self.voice_dir(id);
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| Error::Filesystem(format!("failed to remove {}: {e}", dir.display())))?;

        entry.state = VoiceState::NotInstalled;
        let _ = self.events.send(StateEvent {
            voice_id: id.to_string(),
            state: VoiceState::NotInstalled,
        });
        info!(voice_id = id, "uninstalled");
        Ok(())
    }

    /// One-time idempotent install of the shared synthesis data package
    ///
    /// Concurrent triggers are single-flighted; once the marker directory
    /// exists this returns immediately.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`Error::Network`], [`Error::Extraction`], or
    /// [`Error::Filesystem`] fault; a later call retries from scratch
    pub async fn ensure_shared_data(&self) -> Result<()> {
        let _guard = self.shared_data_guard.lock().await;

        let target = self.config.shared_data_dir();
        if target.exists() {
            return Ok(());
        }

        info!(url = %self.config.shared_data_url, "installing shared synthesis data");

        let staging = tempfile::tempdir_in(&self.config.data_dir)
            .map_err(|e| Error::Filesystem(format!("failed to create staging dir: {e}")))?;

        let archive_name = self
            .config
            .shared_data_url
            .rsplit('/')
            .next()
            .unwrap_or("shared-data.tar.gz")
            .to_string();
        let archive_path = staging.path().join(&archive_name);

        // Progress is not observable for the shared package; drop the
        // receiver and let sends fall into the void.
        let (progress, _) = mpsc::unbounded_channel();
        self.downloader
            .fetch(
                &self.config.shared_data_url,
                &archive_path,
                &CancellationToken::new(),
                progress,
            )
            .await?;

        // Unpack next to the final location, then move into place so the
        // marker directory only ever appears fully populated.
        let unpacked = staging.path().join("unpacked");
        extract::extract(&archive_path, &unpacked).await?;
        extract::normalize_layout(&unpacked, extract::archive_stem(&archive_name)).await?;

        tokio::fs::rename(&unpacked, &target)
            .await
            .map_err(|e| Error::Filesystem(format!("failed to move {}: {e}", target.display())))?;

        info!(path = %target.display(), "shared synthesis data installed");
        Ok(())
    }

    /// Directory a voice installs into
    #[must_use]
    pub fn voice_dir(&self, id: &str) -> PathBuf {
        self.config.voices_dir().join(id)
    }

    async fn run_pipeline(self: Arc<Self>, voice: VoiceDescriptor, cancel: CancellationToken) {
        let result = self.install_pipeline(&voice, &cancel).await;
        match result {
            Ok(()) => {
                info!(voice_id = %voice.id, "install complete");
                self.finish(&voice.id, VoiceState::Installed).await;
            }
            Err(Error::Cancelled) => {
                info!(voice_id = %voice.id, "install cancelled");
                self.remove_partial(&voice.id).await;
                self.finish(&voice.id, VoiceState::NotInstalled).await;
            }
            Err(e) => {
                warn!(voice_id = %voice.id, error = %e, "install failed");
                self.remove_partial(&voice.id).await;
                self.finish(&voice.id, VoiceState::Failed { reason: e.to_string() })
                    .await;
            }
        }
    }

    async fn install_pipeline(&self, voice: &VoiceDescriptor, cancel: &CancellationToken) -> Result<()> {
        // The synthesis engine needs the shared data package regardless of
        // which voice is active; installing a voice implies needing it.
        self.ensure_shared_data().await?;

        let staging = tempfile::tempdir_in(&self.config.data_dir)
            .map_err(|e| Error::Filesystem(format!("failed to create staging dir: {e}")))?;
        let archive_name = voice.archive_name();
        let archive_path = staging.path().join(&archive_name);

        // Drive the fetch and the progress consumer concurrently; the
        // channel closes when the fetch returns.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let fetch = self
            .downloader
            .fetch(&voice.bundle_url, &archive_path, cancel, progress_tx);
        let advisory = voice.size_bytes;
        let consume = async {
            while let Some(p) = progress_rx.recv().await {
                let expected = p.bytes_expected.filter(|t| *t > 0).unwrap_or(advisory);
                #[allow(clippy::cast_precision_loss)]
                let fraction = if expected > 0 {
                    (p.bytes_written as f32 / expected as f32).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                self.set_progress(&voice.id, fraction).await;
            }
        };
        let (fetch_result, ()) = tokio::join!(fetch, consume);
        fetch_result?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Unpack into a clean voice directory
        let voice_dir = self.voice_dir(&voice.id);
        if voice_dir.exists() {
            tokio::fs::remove_dir_all(&voice_dir).await.map_err(|e| {
                Error::Filesystem(format!("failed to clear {}: {e}", voice_dir.display()))
            })?;
        }
        extract::extract(&archive_path, &voice_dir).await?;
        extract::normalize_layout(&voice_dir, extract::archive_stem(&archive_name)).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        canonicalize_model(&voice_dir).await?;

        // Companion metadata: direct fetch, else the recovery ladder. Some
        // bundles ship their own token list; that one wins.
        let tokens_path = voice_dir.join(TOKENS_FILE);
        if !tokens_path.exists() {
            let body = match self.downloader.fetch_text(&voice.tokens_url()).await {
                Ok(body) => Some(body),
                Err(e) => {
                    debug!(voice_id = %voice.id, error = %e, "companion metadata fetch failed");
                    None
                }
            };
            let source = fallback::recover_tokens(
                body.as_deref(),
                voice,
                &self.catalog,
                &self.config.voices_dir(),
                &tokens_path,
            )
            .await?;
            debug!(voice_id = %voice.id, ?source, "companion metadata resolved");
        }

        // No code path may report Installed without both files present.
        if !voice_dir.join(MODEL_FILE).exists() || !tokens_path.exists() {
            return Err(Error::Filesystem(
                "installed files missing after pipeline".to_string(),
            ));
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        Ok(())
    }

    /// Update progress, skipping stale reports after a cancel already landed
    async fn set_progress(&self, id: &str, progress: f32) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(id) else { return };
        if !matches!(entry.state, VoiceState::Installing { .. }) {
            return;
        }
        entry.state = VoiceState::Installing { progress };
        let _ = self.events.send(StateEvent {
            voice_id: id.to_string(),
            state: entry.state.clone(),
        });
    }

    /// Record a terminal state and release the cancel handle
    async fn finish(&self, id: &str, state: VoiceState) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.cancel = None;
            entry.state = state.clone();
        }
        let _ = self.events.send(StateEvent { voice_id: id.to_string(), state });
    }

    /// Best-effort removal of a voice directory after failure or cancel
    async fn remove_partial(&self, id: &str) {
        let dir = self.voice_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(voice_id = id, error = %e, "failed to remove partial install");
            }
        }
    }
}

/// Rename the extracted model file to its canonical name
///
/// # Errors
///
/// Returns [`Error::Extraction`] when the bundle contains no model file
async fn canonicalize_model(voice_dir: &Path) -> Result<()> {
    let canonical = voice_dir.join(MODEL_FILE);
    if canonical.exists() {
        return Ok(());
    }

    let mut dir = tokio::fs::read_dir(voice_dir)
        .await
        .map_err(|e| Error::Filesystem(format!("failed to read {}: {e}", voice_dir.display())))?;
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| Error::Filesystem(format!("failed to read {}: {e}", voice_dir.display())))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "onnx") {
            tokio::fs::rename(&path, &canonical).await.map_err(|e| {
                Error::Filesystem(format!("failed to move {}: {e}", path.display()))
            })?;
            return Ok(());
        }
    }

    Err(Error::Extraction("bundle contains no model file".to_string()))
}

/// Recursive directory size
fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            size += metadata.len();
        } else if metadata.is_dir() {
            size += dir_size(&entry.path())?;
        }
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_voice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::with_data_dir(dir.path().to_path_buf());
        let installer = Arc::new(VoiceInstaller::new(config, Catalog::builtin()).unwrap());

        let err = installer.request_install("no-such-voice").await.unwrap_err();
        assert!(matches!(err, Error::UnknownVoice(_)));
    }

    #[tokio::test]
    async fn catalog_entries_start_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::with_data_dir(dir.path().to_path_buf());
        let installer = VoiceInstaller::new(config, Catalog::builtin()).unwrap();

        for voice in installer.catalog().all() {
            assert_eq!(installer.state(&voice.id).await, VoiceState::NotInstalled);
        }
    }

    #[tokio::test]
    async fn startup_scan_recognizes_complete_installs_and_sweeps_partials() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::with_data_dir(dir.path().to_path_buf());
        let voices_dir = config.voices_dir();

        // Complete install
        let complete = voices_dir.join("aria-en_US-low");
        std::fs::create_dir_all(&complete).unwrap();
        std::fs::write(complete.join(MODEL_FILE), b"weights").unwrap();
        std::fs::write(complete.join(TOKENS_FILE), b"_ 0\n").unwrap();

        // Partial install: model only
        let partial = voices_dir.join("finch-en_GB-medium");
        std::fs::create_dir_all(&partial).unwrap();
        std::fs::write(partial.join(MODEL_FILE), b"weights").unwrap();

        let installer = VoiceInstaller::new(config, Catalog::builtin()).unwrap();

        assert!(installer.is_installed("aria-en_US-low").await);
        assert!(!installer.is_installed("finch-en_GB-medium").await);
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn resolve_paths_only_when_installed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::with_data_dir(dir.path().to_path_buf());
        let voices_dir = config.voices_dir();

        let complete = voices_dir.join("aria-en_US-low");
        std::fs::create_dir_all(&complete).unwrap();
        std::fs::write(complete.join(MODEL_FILE), b"weights").unwrap();
        std::fs::write(complete.join(TOKENS_FILE), b"_ 0\n").unwrap();

        let installer = VoiceInstaller::new(config, Catalog::builtin()).unwrap();

        let paths = installer.resolve_paths("aria-en_US-low").await.unwrap();
        assert!(paths.model.exists());
        assert!(paths.tokens.exists());
        assert!(installer.resolve_paths("finch-en_GB-medium").await.is_none());
    }

    #[tokio::test]
    async fn uninstall_refused_for_non_removable_voice() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::with_data_dir(dir.path().to_path_buf());
        let voices_dir = config.voices_dir();

        let complete = voices_dir.join("aria-en_US-low");
        std::fs::create_dir_all(&complete).unwrap();
        std::fs::write(complete.join(MODEL_FILE), b"weights").unwrap();
        std::fs::write(complete.join(TOKENS_FILE), b"_ 0\n").unwrap();

        let installer = VoiceInstaller::new(config, Catalog::builtin()).unwrap();

        let err = installer.uninstall("aria-en_US-low").await.unwrap_err();
        assert!(matches!(err, Error::NotRemovable(_)));
        assert!(installer.is_installed("aria-en_US-low").await);
    }

    #[tokio::test]
    async fn uninstall_of_not_installed_voice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::with_data_dir(dir.path().to_path_buf());
        let installer = VoiceInstaller::new(config, Catalog::builtin()).unwrap();

        installer.uninstall("finch-en_GB-medium").await.unwrap();
        assert_eq!(
            installer.state("finch-en_GB-medium").await,
            VoiceState::NotInstalled
        );
    }

    #[tokio::test]
    async fn cancel_of_idle_voice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::with_data_dir(dir.path().to_path_buf());
        let installer = VoiceInstaller::new(config, Catalog::builtin()).unwrap();

        installer.cancel_install("finch-en_GB-medium").await;
        assert_eq!(
            installer.state("finch-en_GB-medium").await,
            VoiceState::NotInstalled
        );
    }
}
