//! Error types for the voicepack manager

use thiserror::Error;

/// Result type alias for voicepack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while acquiring and installing voice assets
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level download failure (connection loss, timeout, non-success status)
    #[error("network error: {0}")]
    Network(String),

    /// Archive unpack failure (corrupt archive, tool failure)
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Directory create/move/remove failure
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// Voice id not present in the catalog
    #[error("unknown voice: {0}")]
    UnknownVoice(String),

    /// Uninstall requested for a voice flagged as non-removable
    #[error("voice is not removable: {0}")]
    NotRemovable(String),

    /// Install cancelled by request; a deliberate transition, not a fault
    #[error("install cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
