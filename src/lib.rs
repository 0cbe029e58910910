//! Voicepack - voice asset acquisition and installation manager
//!
//! This library owns the lifecycle of downloadable speech-synthesis voice
//! bundles for a desktop assistant: fetching them from remote hosts,
//! unpacking and normalizing their layout, recovering companion metadata
//! when the authoritative sidecar is unobtainable, and exposing a
//! consistent installed/selected state to the rest of the application.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              UI / synthesis engine               │
//! │    (external: reads states, paths, selection)    │
//! └──────────────────────┬───────────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────────┐
//! │                 VoiceInstaller                   │
//! │  Catalog │ Downloader │ Extractor │ Fallback     │
//! └──────────────────────┬───────────────────────────┘
//!                        │
//! ┌──────────────────────▼───────────────────────────┐
//! │      remote bundle hosts / local data dir        │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod installer;
pub mod selection;

pub use catalog::{Catalog, QualityTier, VoiceDescriptor};
pub use config::ManagerConfig;
pub use download::{DownloadProgress, Downloader};
pub use error::{Error, Result};
pub use fallback::CompanionSource;
pub use installer::{StateEvent, VoiceInstaller, VoicePaths, VoiceState};
pub use selection::SelectionRegistry;
