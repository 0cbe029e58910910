//! Configuration for the voicepack manager

use std::path::PathBuf;
use std::time::Duration;

/// Default host serving the shared phoneme data package
const DEFAULT_SHARED_DATA_URL: &str =
    "https://assets.voicepack.dev/data/phoneme-data.tar.gz";

/// Voice preselected when no valid persisted selection exists
const DEFAULT_VOICE_ID: &str = "aria-en_US-low";

/// Directory layout and tunables for the voice installer
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root data directory; voices and shared data live under it
    pub data_dir: PathBuf,

    /// Voice the selection registry falls back to when the persisted
    /// selection references a voice that is not installed
    pub default_voice: Option<String>,

    /// URL of the shared auxiliary data package required by the
    /// synthesis engine regardless of which voice is active
    pub shared_data_url: String,

    /// Per-request download timeout
    pub download_timeout: Duration,
}

impl ManagerConfig {
    /// Load configuration from the environment with platform defaults
    ///
    /// Reads `VOICEPACK_DATA_DIR` (default: XDG data dir),
    /// `VOICEPACK_DEFAULT_VOICE`, and `VOICEPACK_SHARED_DATA_URL`.
    #[must_use]
    pub fn load() -> Self {
        let data_dir = std::env::var("VOICEPACK_DATA_DIR").map_or_else(
            |_| {
                directories::ProjectDirs::from("dev", "voicepack", "voicepack").map_or_else(
                    || PathBuf::from(".voicepack"),
                    |d| d.data_dir().to_path_buf(),
                )
            },
            PathBuf::from,
        );

        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            tracing::warn!(
                path = %data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        let default_voice = std::env::var("VOICEPACK_DEFAULT_VOICE")
            .ok()
            .or_else(|| Some(DEFAULT_VOICE_ID.to_string()));

        let shared_data_url = std::env::var("VOICEPACK_SHARED_DATA_URL")
            .unwrap_or_else(|_| DEFAULT_SHARED_DATA_URL.to_string());

        Self {
            data_dir,
            default_voice,
            shared_data_url,
            download_timeout: Duration::from_secs(3600),
        }
    }

    /// Build a configuration rooted at an explicit data directory
    #[must_use]
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            default_voice: Some(DEFAULT_VOICE_ID.to_string()),
            shared_data_url: DEFAULT_SHARED_DATA_URL.to_string(),
            download_timeout: Duration::from_secs(3600),
        }
    }

    /// Directory holding one subdirectory per installed voice
    #[must_use]
    pub fn voices_dir(&self) -> PathBuf {
        self.data_dir.join("voices")
    }

    /// Marker directory for the shared auxiliary data package
    #[must_use]
    pub fn shared_data_dir(&self) -> PathBuf {
        self.data_dir.join("phoneme-data")
    }

    /// Path of the persisted selection file
    #[must_use]
    pub fn selection_path(&self) -> PathBuf {
        self.data_dir.join("selection.json")
    }
}
