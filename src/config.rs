//! Configuration types for the turn-taking and transcript protocol.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the protocol core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Turn controller settings (producer side).
    pub turn: TurnConfig,
    /// Wire framing and reassembly settings.
    pub wire: WireConfig,
}

/// Turn controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Greeting spoken (and transcribed) when the first user joins.
    pub greeting: String,
    /// Partial recognition length (chars) above which barge-in triggers.
    ///
    /// Final recognition results always trigger barge-in regardless of length.
    pub interrupt_min_chars: usize,
    /// Session id assumed when recognition metadata carries none.
    ///
    /// The reference system used the literal `"100"` here, which doubles as
    /// the numeric stream id after coercion. Kept configurable because it
    /// conflates "no metadata" with a specific reserved id.
    pub fallback_session_id: String,
    /// Fixed stream id for assistant (broadcast) transcript events.
    pub assistant_stream_id: i64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            greeting: "Hello! How can I help you today?".to_owned(),
            interrupt_min_chars: 2,
            fallback_session_id: "100".to_owned(),
            assistant_stream_id: -1,
        }
    }
}

/// Wire framing and reassembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// How long an incomplete message may wait for its remaining fragments
    /// before being evicted from the reassembly cache.
    pub eviction_timeout_ms: u64,
    /// Maximum base64 payload characters carried per wire fragment.
    pub max_fragment_chars: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            eviction_timeout_ms: 5_000,
            max_fragment_chars: 512,
        }
    }
}

impl ProtocolConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ProtocolError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ProtocolError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
