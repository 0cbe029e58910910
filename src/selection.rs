//! Persisted active-voice selection
//!
//! The registry owns a single persisted voice id. A selection is only ever
//! accepted for an installed voice; an invalid persisted id is corrected
//! silently at load time, never surfaced as an error.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::installer::VoiceInstaller;

#[derive(Debug, Serialize, Deserialize)]
struct SelectionFile {
    active_voice: Option<String>,
}

/// Tracks and persists which installed voice is active
pub struct SelectionRegistry {
    store_path: PathBuf,
    default_voice: Option<String>,
    current: watch::Sender<Option<String>>,
}

impl SelectionRegistry {
    /// Create a registry persisting under the manager's data directory
    #[must_use]
    pub fn new(config: &ManagerConfig) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            store_path: config.selection_path(),
            default_voice: config.default_voice.clone(),
            current,
        }
    }

    /// Load the persisted selection, correcting invalid references
    ///
    /// A persisted id referencing a voice that is not installed is replaced
    /// by the configured default when that one is installed, otherwise the
    /// selection is left unset. Never an error.
    pub async fn load(&self, installer: &VoiceInstaller) {
        let persisted = self.read_store();

        if let Some(id) = &persisted {
            if installer.is_installed(id).await {
                debug!(voice_id = %id, "restored persisted selection");
                let _ = self.current.send(persisted);
                return;
            }
            warn!(voice_id = %id, "persisted selection is not installed, falling back");
        }

        if let Some(default) = &self.default_voice {
            if installer.is_installed(default).await {
                info!(voice_id = %default, "selection reset to default voice");
                self.persist(Some(default));
                let _ = self.current.send(Some(default.clone()));
                return;
            }
        }

        let _ = self.current.send(None);
    }

    /// Make `id` the active voice
    ///
    /// Returns `false` and leaves the previous selection unchanged unless
    /// the voice is installed. On success the id is persisted and observers
    /// are notified.
    pub async fn select(&self, id: &str, installer: &VoiceInstaller) -> bool {
        if !installer.is_installed(id).await {
            debug!(voice_id = id, "selection rejected, voice not installed");
            return false;
        }
        self.persist(Some(id));
        let _ = self.current.send(Some(id.to_string()));
        info!(voice_id = id, "voice selected");
        true
    }

    /// The currently active voice id, if any
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    /// Observe selection changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }

    fn read_store(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.store_path).ok()?;
        match serde_json::from_str::<SelectionFile>(&content) {
            Ok(file) => file.active_voice,
            Err(e) => {
                warn!(
                    path = %self.store_path.display(),
                    error = %e,
                    "failed to parse selection file, ignoring"
                );
                None
            }
        }
    }

    fn persist(&self, id: Option<&str>) {
        let file = SelectionFile {
            active_voice: id.map(ToString::to_string),
        };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.store_path, json) {
                    warn!(
                        path = %self.store_path.display(),
                        error = %e,
                        "failed to persist selection"
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize selection");
            }
        }
    }
}
