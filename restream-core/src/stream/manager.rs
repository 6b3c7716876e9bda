//! Lifecycle of a single stream

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::encoder::{EncoderInvocation, EncoderLauncher, EncoderProcess};
use super::{StreamError, StreamId, StreamState, StreamView, format_elapsed, mask_key};
use crate::config::EncoderConfig;
use crate::source::ResolvedSource;

/// Lifecycle state; the process handle and start time only exist while streaming.
#[derive(Debug)]
enum Lifecycle {
    Ready,
    Streaming {
        process: EncoderProcess,
        started_at: DateTime<Utc>,
        started: Instant,
    },
    Stopped,
    Error,
}

/// Owns one stream's encoder process and lifecycle.
///
/// Callers provide exclusion; the registry keeps each manager behind its
/// own lock so operations on one stream are linearizable.
#[derive(Debug)]
pub struct StreamManager {
    id: StreamId,
    name: String,
    key: String,
    source: ResolvedSource,
    created_at: DateTime<Utc>,
    lifecycle: Lifecycle,
    last_error: Option<String>,
    retired: bool,
    launcher: Arc<dyn EncoderLauncher>,
    config: EncoderConfig,
}

impl StreamManager {
    pub fn new(
        id: StreamId,
        name: String,
        key: String,
        source: ResolvedSource,
        launcher: Arc<dyn EncoderLauncher>,
        config: EncoderConfig,
    ) -> Self {
        Self {
            id,
            name,
            key,
            source,
            created_at: Utc::now(),
            lifecycle: Lifecycle::Ready,
            last_error: None,
            retired: false,
            launcher,
            config,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StreamState {
        match self.lifecycle {
            Lifecycle::Ready => StreamState::Ready,
            Lifecycle::Streaming { .. } => StreamState::Streaming,
            Lifecycle::Stopped => StreamState::Stopped,
            Lifecycle::Error => StreamState::Error,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Streaming { .. })
    }

    /// Launches the encoder.
    ///
    /// Allowed from any state except `Streaming`, including `Error`.
    ///
    /// # Errors
    /// - `StreamError::AlreadyRunning` - Stream is already streaming
    /// - `StreamError::StartFailure` - Encoder could not be spawned
    pub fn start(&mut self) -> Result<(), StreamError> {
        if self.is_streaming() {
            return Err(StreamError::AlreadyRunning {
                name: self.name.clone(),
            });
        }

        let invocation =
            EncoderInvocation::new(&self.config, &self.source.locator, &self.key, &self.name);

        match self.launcher.launch(&invocation) {
            Ok(process) => {
                info!(
                    stream_id = %self.id,
                    pid = ?process.id(),
                    "Stream '{}' started -> {}",
                    self.name,
                    invocation.redacted_destination()
                );
                self.lifecycle = Lifecycle::Streaming {
                    process,
                    started_at: Utc::now(),
                    started: Instant::now(),
                };
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                error!(stream_id = %self.id, "Failed to start stream '{}': {}", self.name, e);
                let reason = e.to_string();
                self.fail(reason.clone());
                Err(StreamError::StartFailure {
                    name: self.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Terminates the encoder gracefully.
    ///
    /// On failure the process is killed and the stream moves to `Error`.
    ///
    /// # Errors
    /// - `StreamError::NotRunning` - Stream is not streaming
    /// - `StreamError::StopFailure` - Encoder did not exit within the stop timeout
    pub async fn stop(&mut self) -> Result<(), StreamError> {
        let mut process = match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Streaming { process, .. } => process,
            other => {
                self.lifecycle = other;
                return Err(StreamError::NotRunning {
                    name: self.name.clone(),
                });
            }
        };

        match process.terminate(self.config.stop_timeout).await {
            Ok(status) => {
                info!(stream_id = %self.id, "Stream '{}' stopped ({})", self.name, status);
                Ok(())
            }
            Err(e) => {
                error!(stream_id = %self.id, "Failed to stop stream '{}': {}", self.name, e);
                process.kill();
                let reason = e.to_string();
                self.fail(reason.clone());
                Err(StreamError::StopFailure {
                    name: self.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Elapsed streaming time as `HH:MM:SS`, or `00:00:00` when not streaming.
    pub fn duration(&self) -> String {
        match &self.lifecycle {
            Lifecycle::Streaming { started, .. } => format_elapsed(started.elapsed()),
            _ => format_elapsed(std::time::Duration::ZERO),
        }
    }

    pub fn snapshot(&self) -> StreamView {
        let start_time = match &self.lifecycle {
            Lifecycle::Streaming { started_at, .. } => Some(*started_at),
            _ => None,
        };

        StreamView {
            stream_id: self.id,
            stream_name: self.name.clone(),
            source_type: self.source.kind,
            source_path: self.source.locator.clone(),
            video_info: self.source.metadata.clone(),
            status: self.state(),
            is_streaming: self.is_streaming(),
            duration: self.duration(),
            start_time,
            created_at: self.created_at,
            key_hint: mask_key(&self.key),
            last_error: self.last_error.clone(),
        }
    }

    /// Stops the stream if needed and marks it removed.
    ///
    /// A stop failure is logged and does not prevent retirement.
    pub async fn retire(&mut self) {
        if self.is_streaming()
            && let Err(e) = self.stop().await
        {
            warn!(stream_id = %self.id, "Ignoring stop failure during delete: {}", e);
        }
        self.retired = true;
    }

    /// Whether the stream has been removed from its registry.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    fn fail(&mut self, reason: String) {
        self.lifecycle = Lifecycle::Error;
        self.last_error = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::test_mocks::{FailingLauncher, SleepLauncher, StubbornLauncher};
    use super::*;
    use crate::source::{SourceKind, SourceMetadata};

    fn source() -> ResolvedSource {
        ResolvedSource {
            locator: "/srv/uploads/clip.mp4".to_string(),
            kind: SourceKind::Local,
            metadata: SourceMetadata::titled("clip.mp4"),
        }
    }

    fn manager(launcher: Arc<dyn EncoderLauncher>) -> StreamManager {
        StreamManager::new(
            StreamId::new(),
            "Morning show".to_string(),
            "abcd-efgh-ijkl-mnop".to_string(),
            source(),
            launcher,
            EncoderConfig {
                stop_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let launcher = Arc::new(SleepLauncher::new());
        let mut stream = manager(launcher.clone());
        assert_eq!(stream.state(), StreamState::Ready);

        stream.start().unwrap();
        assert_eq!(stream.state(), StreamState::Streaming);
        assert!(stream.snapshot().start_time.is_some());
        assert_eq!(launcher.launches(), 1);

        stream.stop().await.unwrap();
        assert_eq!(stream.state(), StreamState::Stopped);
        assert!(stream.snapshot().start_time.is_none());
        assert_eq!(stream.duration(), "00:00:00");
    }

    #[tokio::test]
    async fn test_second_start_is_already_running() {
        let launcher = Arc::new(SleepLauncher::new());
        let mut stream = manager(launcher.clone());

        stream.start().unwrap();
        assert!(matches!(
            stream.start(),
            Err(StreamError::AlreadyRunning { .. })
        ));
        assert_eq!(launcher.launches(), 1);
        stream.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_not_running() {
        let mut stream = manager(Arc::new(SleepLauncher::new()));
        assert!(matches!(
            stream.stop().await,
            Err(StreamError::NotRunning { .. })
        ));
        assert_eq!(stream.state(), StreamState::Ready);
    }

    #[tokio::test]
    async fn test_stop_is_not_running_after_successful_stop() {
        let mut stream = manager(Arc::new(SleepLauncher::new()));
        stream.start().unwrap();
        stream.stop().await.unwrap();

        for _ in 0..2 {
            assert!(matches!(
                stream.stop().await,
                Err(StreamError::NotRunning { .. })
            ));
            assert_eq!(stream.state(), StreamState::Stopped);
        }
    }

    #[tokio::test]
    async fn test_launch_failure_moves_to_error_and_is_recoverable() {
        let mut stream = manager(Arc::new(FailingLauncher));
        let err = stream.start().unwrap_err();
        assert!(matches!(err, StreamError::StartFailure { .. }));
        assert!(!err.to_string().contains("abcd-efgh-ijkl-mnop"));
        assert_eq!(stream.state(), StreamState::Error);
        assert!(stream.snapshot().last_error.is_some());

        // Error is not terminal: a working launcher brings the stream back.
        stream.launcher = Arc::new(SleepLauncher::new());
        stream.start().unwrap();
        assert_eq!(stream.state(), StreamState::Streaming);
        assert!(stream.snapshot().last_error.is_none());
        stream.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_timeout_moves_to_error() {
        let mut stream = manager(Arc::new(StubbornLauncher));
        stream.start().unwrap();
        // Give the shell time to install its signal trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = stream.stop().await.unwrap_err();
        assert!(matches!(err, StreamError::StopFailure { .. }));
        assert_eq!(stream.state(), StreamState::Error);
        assert!(stream.snapshot().start_time.is_none());

        assert!(matches!(
            stream.stop().await,
            Err(StreamError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_duration_counts_whole_seconds_while_streaming() {
        let mut stream = manager(Arc::new(SleepLauncher::new()));
        assert_eq!(stream.duration(), "00:00:00");

        stream.start().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(stream.duration(), "00:00:01");
        stream.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_never_exposes_key() {
        let stream = manager(Arc::new(SleepLauncher::new()));
        let view = stream.snapshot();
        let json = serde_json::to_string(&view).unwrap();

        assert!(!json.contains("abcd-efgh-ijkl-mnop"));
        assert_eq!(view.key_hint, "****mnop");
        assert_eq!(view.status, StreamState::Ready);
        assert!(!view.is_streaming);
    }

    #[tokio::test]
    async fn test_retire_stops_running_stream() {
        let mut stream = manager(Arc::new(SleepLauncher::new()));
        stream.start().unwrap();
        stream.retire().await;
        assert!(stream.is_retired());
        assert_eq!(stream.state(), StreamState::Stopped);
    }
}
