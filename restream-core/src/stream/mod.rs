//! Per-stream encoder supervision.
//!
//! A [`StreamManager`] owns one encoder child process and a small state
//! machine: `Ready -> Streaming -> Stopped`, with `Error` reachable from any
//! state on an operational failure and left again by the next successful
//! `start()`.

pub mod encoder;
pub mod manager;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use encoder::{EncoderInvocation, EncoderLauncher, EncoderProcess, FfmpegLauncher};
pub use manager::StreamManager;

use crate::source::{SourceKind, SourceMetadata};

/// Errors raised by stream lifecycle operations.
///
/// Messages are shown to operators and never include the destination key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("Stream '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("No active stream '{name}' to stop")]
    NotRunning { name: String },

    #[error("Error starting stream '{name}': {reason}")]
    StartFailure { name: String, reason: String },

    #[error("Error stopping stream '{name}': {reason}")]
    StopFailure { name: String, reason: String },
}

/// Unique stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StreamId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Commanded lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Ready,
    Streaming,
    Stopped,
    Error,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Ready => write!(f, "Ready"),
            StreamState::Streaming => write!(f, "Streaming"),
            StreamState::Stopped => write!(f, "Stopped"),
            StreamState::Error => write!(f, "Error"),
        }
    }
}

/// Read-only projection of a stream for external reporting.
///
/// Carries neither the destination key nor the process handle.
#[derive(Debug, Clone, Serialize)]
pub struct StreamView {
    pub stream_id: StreamId,
    pub stream_name: String,
    pub source_type: SourceKind,
    pub source_path: String,
    pub video_info: SourceMetadata,
    pub status: StreamState,
    pub is_streaming: bool,
    /// Elapsed streaming time as `HH:MM:SS`
    pub duration: String,
    pub start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Masked destination key, e.g. `****wxyz`
    pub key_hint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Formats an elapsed duration as `HH:MM:SS`, truncated to whole seconds.
///
/// Hours are not wrapped, so a stream running for four days shows `96:00:00`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Masks a destination key for display.
pub fn mask_key(key: &str) -> String {
    const VISIBLE: usize = 4;
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < VISIBLE * 3 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - VISIBLE..].iter().collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "00:00:59");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_elapsed(Duration::from_secs(4 * 86_400)), "96:00:00");
    }

    #[test]
    fn test_mask_key_hides_short_keys_entirely() {
        assert_eq!(mask_key("abcd"), "****");
        assert_eq!(mask_key("abcd-efgh-ijkl-mnop"), "****mnop");
    }

    #[test]
    fn test_stream_id_parses_its_display_form() {
        let id = StreamId::new();
        assert_eq!(id.to_string().parse::<StreamId>().unwrap(), id);
        assert!("not-an-id".parse::<StreamId>().is_err());
    }

    proptest! {
        #[test]
        fn prop_format_elapsed_round_trips_whole_seconds(secs in 0u64..1_000_000, millis in 0u64..1000) {
            let formatted = format_elapsed(Duration::from_secs(secs) + Duration::from_millis(millis));
            let parts: Vec<u64> = formatted.split(':').map(|p| p.parse().unwrap()).collect();
            prop_assert_eq!(parts.len(), 3);
            prop_assert!(parts[1] < 60 && parts[2] < 60);
            prop_assert_eq!(parts[0] * 3600 + parts[1] * 60 + parts[2], secs);
        }
    }
}
