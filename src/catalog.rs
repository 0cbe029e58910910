//! Static registry of known voice assets
//!
//! The catalog is populated once at startup and never mutated. Each entry
//! describes where a voice bundle lives remotely and how its companion
//! token-list URL is derived from the bundle URL.

use serde::{Deserialize, Serialize};
use url::Url;

/// Host serving the built-in voice bundles
const BUNDLE_BASE_URL: &str = "https://assets.voicepack.dev/voices";

/// Ordered voice quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Immutable description of a downloadable voice asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceDescriptor {
    /// Stable voice id (e.g. `aria-en_US-low`)
    pub id: String,

    /// Human-readable name for discovery UIs
    pub display_name: String,

    /// Quality tier
    pub quality: QualityTier,

    /// BCP 47 locale tag
    pub locale: String,

    /// Synthesis model format family; voices sharing a format can lend
    /// each other a token list when the authoritative one is unobtainable
    pub format: String,

    /// URL of the compressed bundle containing the primary model file
    pub bundle_url: String,

    /// Advisory bundle size in bytes, used only for progress estimation
    pub size_bytes: u64,

    /// Whether the voice may be uninstalled; the bundled default is not
    pub removable: bool,
}

impl VoiceDescriptor {
    /// File name of the remote bundle (last path segment of the URL)
    #[must_use]
    pub fn archive_name(&self) -> String {
        Url::parse(&self.bundle_url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(ToString::to_string))
            })
            .unwrap_or_else(|| format!("{}.tar.gz", self.id))
    }

    /// Companion token-list URL, derived by swapping the archive suffix
    /// of the bundle URL for `.json`
    #[must_use]
    pub fn tokens_url(&self) -> String {
        let name = self.archive_name();
        let stem = crate::extract::archive_stem(&name);
        let base = self.bundle_url.trim_end_matches(&name);
        format!("{base}{stem}.json")
    }
}

/// Read-only list of known voices, populated once at startup
#[derive(Debug, Clone)]
pub struct Catalog {
    voices: Vec<VoiceDescriptor>,
}

impl Catalog {
    /// Build a catalog from explicit descriptors
    #[must_use]
    pub fn new(voices: Vec<VoiceDescriptor>) -> Self {
        Self { voices }
    }

    /// The built-in voice registry
    #[must_use]
    pub fn builtin() -> Self {
        let entry = |id: &str, name: &str, quality, locale: &str, size: u64, removable| {
            VoiceDescriptor {
                id: id.to_string(),
                display_name: name.to_string(),
                quality,
                locale: locale.to_string(),
                format: "vits".to_string(),
                bundle_url: format!("{BUNDLE_BASE_URL}/{id}.tar.gz"),
                size_bytes: size,
                removable,
            }
        };

        Self::new(vec![
            entry(
                "aria-en_US-low",
                "Aria (US English, compact)",
                QualityTier::Low,
                "en-US",
                24_000_000,
                false,
            ),
            entry(
                "aria-en_US-high",
                "Aria (US English, studio)",
                QualityTier::High,
                "en-US",
                115_000_000,
                true,
            ),
            entry(
                "finch-en_GB-medium",
                "Finch (British English)",
                QualityTier::Medium,
                "en-GB",
                64_000_000,
                true,
            ),
            entry(
                "lyra-de_DE-medium",
                "Lyra (German)",
                QualityTier::Medium,
                "de-DE",
                64_000_000,
                true,
            ),
            entry(
                "sora-ja_JP-low",
                "Sora (Japanese, compact)",
                QualityTier::Low,
                "ja-JP",
                28_000_000,
                true,
            ),
        ])
    }

    /// Look up a voice by id
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&VoiceDescriptor> {
        self.voices.iter().find(|v| v.id == id)
    }

    /// Enumerate all known voices
    #[must_use]
    pub fn all(&self) -> &[VoiceDescriptor] {
        &self.voices
    }
}
