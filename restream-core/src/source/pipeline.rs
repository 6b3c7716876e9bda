//! Trigger-and-poll resolution against an external extraction pipeline.
//!
//! A job is submitted once with the source URL, its status is polled on a
//! fixed interval until it reaches a terminal state or the deadline passes,
//! and on success the final payload is fetched from a well-known location.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ResolutionError, ResolvedSource, SourceKind, SourceMetadata, UNKNOWN};
use crate::config::{ConfigError, PipelineConfig};

/// Maximum number of response body bytes carried into error messages.
const MAX_ERROR_BODY: usize = 200;

/// Failure of a single pipeline HTTP call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineCallError {
    #[error("pipeline trigger token is not configured")]
    MissingToken,

    #[error("pipeline rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("unexpected response: {reason}")]
    Decode { reason: String },
}

/// Job status as reported by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    /// A status this client does not know; treated as still in progress
    Other(String),
}

impl PipelineStatus {
    /// Maps the pipeline's status string.
    pub fn from_api(status: &str) -> Self {
        match status {
            "created" | "pending" | "waiting_for_resource" | "preparing" | "scheduled"
            | "manual" => PipelineStatus::Pending,
            "running" => PipelineStatus::Running,
            "success" => PipelineStatus::Succeeded,
            "failed" | "canceled" | "skipped" => PipelineStatus::Failed(status.to_string()),
            other => PipelineStatus::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Succeeded | PipelineStatus::Failed(_))
    }
}

/// Extraction job tracked for the duration of one resolution call.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
    pub status: PipelineStatus,
    /// Number of status responses received so far
    pub polls: u32,
}

impl ExtractionJob {
    fn new(job_id: String) -> Self {
        Self {
            job_id,
            submitted_at: Utc::now(),
            status: PipelineStatus::Pending,
            polls: 0,
        }
    }

    fn record(&mut self, status: PipelineStatus) {
        self.polls += 1;
        self.status = status;
    }
}

/// Final payload written by the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelinePayload {
    #[serde(default)]
    pub success: bool,
    pub direct_url: Option<String>,
    pub error: Option<String>,
    pub title: Option<String>,
    pub duration: Option<serde_json::Value>,
    pub channel: Option<String>,
    pub quality: Option<serde_json::Value>,
}

impl PipelinePayload {
    /// Converts the payload into a resolved remote source.
    ///
    /// # Errors
    /// - `ResolutionError::Extraction` - Payload reports an internal extraction error
    pub fn into_resolved(self) -> Result<ResolvedSource, ResolutionError> {
        if !self.success {
            return Err(ResolutionError::Extraction {
                reason: self
                    .error
                    .unwrap_or_else(|| "pipeline reported an unknown error".to_string()),
            });
        }

        let locator = self
            .direct_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ResolutionError::Extraction {
                reason: "pipeline result has no direct_url".to_string(),
            })?;

        Ok(ResolvedSource {
            locator,
            kind: SourceKind::Remote,
            metadata: SourceMetadata {
                title: self.title.unwrap_or_else(|| UNKNOWN.to_string()),
                duration: render_duration(self.duration),
                quality: render_value(self.quality),
                channel: self.channel.unwrap_or_else(|| UNKNOWN.to_string()),
                views: None,
                size: None,
            },
        })
    }
}

fn render_value(value: Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

fn render_duration(value: Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::Number(n)) => match n.as_f64() {
            Some(seconds) if seconds > 0.0 => format!("{}s", seconds.trunc() as u64),
            _ => UNKNOWN.to_string(),
        },
        other => render_value(other),
    }
}

/// External pipeline that runs extraction jobs.
#[async_trait]
pub trait ExtractionPipeline: Send + Sync + std::fmt::Debug {
    /// Submits a job for `url` and returns its identifier.
    async fn trigger(&self, url: &str) -> Result<String, PipelineCallError>;

    /// Reads the current status of a job.
    async fn status(&self, job_id: &str) -> Result<PipelineStatus, PipelineCallError>;

    /// Fetches the final payload once a job has succeeded.
    async fn fetch_result(&self, job_id: &str) -> Result<PipelinePayload, PipelineCallError>;
}

/// HTTP client for a CI-style trigger/status/artifact pipeline.
#[derive(Debug, Clone)]
pub struct HttpExtractionPipeline {
    config: PipelineConfig,
    client: reqwest::Client,
}

impl HttpExtractionPipeline {
    /// Creates the client.
    ///
    /// # Errors
    /// - `ConfigError::InvalidValue` - HTTP client could not be constructed
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "pipeline",
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, client })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.header("PRIVATE-TOKEN", token),
            None => request,
        }
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, PipelineCallError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
        Err(PipelineCallError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

fn network_error(e: reqwest::Error) -> PipelineCallError {
    PipelineCallError::Network {
        reason: e.to_string(),
    }
}

fn decode_error(e: reqwest::Error) -> PipelineCallError {
    PipelineCallError::Decode {
        reason: e.to_string(),
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[async_trait]
impl ExtractionPipeline for HttpExtractionPipeline {
    async fn trigger(&self, url: &str) -> Result<String, PipelineCallError> {
        let token = self
            .config
            .trigger_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or(PipelineCallError::MissingToken)?;

        let variable = format!("variables[{}]", self.config.url_variable);
        let form = [
            ("token", token),
            ("ref", self.config.git_ref.as_str()),
            (variable.as_str(), url),
        ];

        let response = self
            .client
            .post(&self.config.trigger_url)
            .form(&form)
            .send()
            .await
            .map_err(network_error)?;
        let body: serde_json::Value = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(decode_error)?;

        match body.get("id") {
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            _ => Err(PipelineCallError::Decode {
                reason: "trigger response has no job id".to_string(),
            }),
        }
    }

    async fn status(&self, job_id: &str) -> Result<PipelineStatus, PipelineCallError> {
        let url = self.config.status_url.replace("{job_id}", job_id);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(network_error)?;
        let body: StatusResponse = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(decode_error)?;

        Ok(PipelineStatus::from_api(&body.status))
    }

    async fn fetch_result(&self, job_id: &str) -> Result<PipelinePayload, PipelineCallError> {
        let url = self.config.result_url.replace("{job_id}", job_id);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(network_error)?;

        Self::checked(response)
            .await?
            .json()
            .await
            .map_err(decode_error)
    }
}

/// Drives one job through submit, poll and fetch.
#[derive(Debug, Clone)]
pub struct PipelineResolver {
    pipeline: Arc<dyn ExtractionPipeline>,
    poll_interval: Duration,
    deadline: Duration,
}

impl PipelineResolver {
    pub fn new(
        pipeline: Arc<dyn ExtractionPipeline>,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            pipeline,
            poll_interval,
            deadline,
        }
    }

    /// Resolves `url` through the pipeline.
    ///
    /// Status call failures are transient: they cost one interval and the
    /// loop carries on until the deadline.
    ///
    /// # Errors
    /// - `ResolutionError::Submission` - Trigger call failed or was rejected
    /// - `ResolutionError::Pipeline` - Job reached a failed status
    /// - `ResolutionError::Timeout` - No terminal status before the deadline
    /// - `ResolutionError::Extraction` - Result fetch failed or reported an error
    /// - `ResolutionError::Cancelled` - `cancel` fired before completion
    pub async fn resolve(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ResolutionError> {
        let submitted = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ResolutionError::Cancelled { job_id: "unsubmitted".to_string() });
            }
            submitted = self.pipeline.trigger(url) => submitted,
        };

        let job_id = submitted.map_err(|e| ResolutionError::Submission {
            reason: e.to_string(),
        })?;

        let mut job = ExtractionJob::new(job_id);
        info!("Submitted extraction job {} for {}", job.job_id, url);

        self.await_completion(&mut job, cancel).await?;
        self.fetch(&job, cancel).await
    }

    async fn await_completion(
        &self,
        job: &mut ExtractionJob,
        cancel: &CancellationToken,
    ) -> Result<(), ResolutionError> {
        let started = Instant::now();
        let deadline = started + self.deadline;

        loop {
            let wake = (Instant::now() + self.poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Abandoning extraction job {}", job.job_id);
                    return Err(ResolutionError::Cancelled { job_id: job.job_id.clone() });
                }
                _ = tokio::time::sleep_until(wake) => {}
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Abandoning extraction job {}", job.job_id);
                    return Err(ResolutionError::Cancelled { job_id: job.job_id.clone() });
                }
                polled = tokio::time::timeout_at(deadline, self.pipeline.status(&job.job_id)) => polled,
            };

            match polled {
                Ok(Ok(status)) => {
                    job.record(status);
                    debug!(
                        "Extraction job {} poll #{}: {:?}",
                        job.job_id, job.polls, job.status
                    );
                    match &job.status {
                        PipelineStatus::Succeeded => return Ok(()),
                        PipelineStatus::Failed(status) => {
                            warn!("Extraction job {} ended with {}", job.job_id, status);
                            return Err(ResolutionError::Pipeline {
                                job_id: job.job_id.clone(),
                                status: status.clone(),
                            });
                        }
                        _ => {}
                    }
                }
                Ok(Err(e)) => {
                    warn!("Status check for job {} failed, retrying: {}", job.job_id, e);
                }
                Err(_) => {
                    warn!("Status check for job {} overran the deadline", job.job_id);
                }
            }

            if Instant::now() >= deadline {
                return Err(ResolutionError::Timeout {
                    job_id: job.job_id.clone(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
        }
    }

    async fn fetch(
        &self,
        job: &ExtractionJob,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ResolutionError> {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ResolutionError::Cancelled { job_id: job.job_id.clone() });
            }
            fetched = self.pipeline.fetch_result(&job.job_id) => fetched,
        };

        let payload = fetched.map_err(|e| ResolutionError::Extraction {
            reason: format!("failed to fetch result of job {}: {e}", job.job_id),
        })?;

        let resolved = payload.into_resolved()?;
        info!(
            "Extraction job {} resolved '{}' after {} polls",
            job.job_id, resolved.metadata.title, job.polls
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_mocks::ScriptedPipeline;
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(5);
    const DEADLINE: Duration = Duration::from_secs(120);

    fn resolver(pipeline: Arc<ScriptedPipeline>) -> PipelineResolver {
        PipelineResolver::new(pipeline, INTERVAL, DEADLINE)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_twice_then_success_polls_three_times() {
        let pipeline = Arc::new(ScriptedPipeline::new().with_statuses([
            PipelineStatus::Pending,
            PipelineStatus::Pending,
            PipelineStatus::Succeeded,
        ]));

        let started = Instant::now();
        let resolved = resolver(pipeline.clone())
            .resolve("https://video.example.com/a", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resolved.locator, "https://cdn.example.com/pipeline.mp4");
        let calls = pipeline.status_call_times();
        assert_eq!(calls.len(), 3);
        for (i, at) in calls.iter().enumerate() {
            assert_eq!(at.duration_since(started), INTERVAL * (i as u32 + 1));
        }
        assert_eq!(pipeline.fetch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_terminal_times_out_at_deadline() {
        let pipeline = Arc::new(ScriptedPipeline::new().with_fallback(PipelineStatus::Running));

        let started = Instant::now();
        let result = resolver(pipeline.clone())
            .resolve("https://video.example.com/a", &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(ResolutionError::Timeout { waited_secs: 120, .. })
        ));
        assert_eq!(started.elapsed(), DEADLINE);
        assert_eq!(pipeline.status_call_times().len(), 24);
        assert_eq!(pipeline.fetch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_consume_intervals_and_continue() {
        let pipeline = Arc::new(
            ScriptedPipeline::new()
                .with_status_results([
                    Err(PipelineCallError::Network {
                        reason: "connection reset".to_string(),
                    }),
                    Err(PipelineCallError::Rejected {
                        status: 502,
                        body: "bad gateway".to_string(),
                    }),
                    Ok(PipelineStatus::Succeeded),
                ]),
        );

        let result = resolver(pipeline.clone())
            .resolve("https://video.example.com/a", &CancellationToken::new())
            .await;

        assert!(result.is_ok());
        assert_eq!(pipeline.status_call_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_fails_immediately() {
        let pipeline = Arc::new(ScriptedPipeline::new().with_statuses([
            PipelineStatus::Running,
            PipelineStatus::from_api("failed"),
        ]));

        let result = resolver(pipeline.clone())
            .resolve("https://video.example.com/a", &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(ResolutionError::Pipeline { ref status, .. }) if status == "failed"
        ));
        assert_eq!(pipeline.status_call_times().len(), 2);
        assert_eq!(pipeline.fetch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_trigger_is_submission_error() {
        let pipeline = Arc::new(
            ScriptedPipeline::new().with_trigger_error(PipelineCallError::MissingToken),
        );

        let result = resolver(pipeline.clone())
            .resolve("https://video.example.com/a", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ResolutionError::Submission { .. })));
        assert!(pipeline.status_call_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_error_is_extraction_error() {
        let pipeline = Arc::new(
            ScriptedPipeline::new()
                .with_statuses([PipelineStatus::Succeeded])
                .with_payload(PipelinePayload {
                    success: false,
                    error: Some("Sign in to confirm your age".to_string()),
                    ..Default::default()
                }),
        );

        let result = resolver(pipeline)
            .resolve("https://video.example.com/a", &CancellationToken::new())
            .await;

        match result {
            Err(ResolutionError::Extraction { reason }) => {
                assert_eq!(reason, "Sign in to confirm your age")
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_is_extraction_error() {
        let pipeline = Arc::new(
            ScriptedPipeline::new()
                .with_statuses([PipelineStatus::Succeeded])
                .with_fetch_error(PipelineCallError::Rejected {
                    status: 404,
                    body: "not found".to_string(),
                }),
        );

        let result = resolver(pipeline)
            .resolve("https://video.example.com/a", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ResolutionError::Extraction { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let pipeline = Arc::new(ScriptedPipeline::new().with_fallback(PipelineStatus::Pending));
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(12)).await;
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let result = resolver(pipeline.clone())
            .resolve("https://video.example.com/a", &cancel)
            .await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(ResolutionError::Cancelled { .. })));
        assert_eq!(started.elapsed(), Duration::from_secs(12));
        assert_eq!(pipeline.status_call_times().len(), 2);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(PipelineStatus::from_api("pending"), PipelineStatus::Pending);
        assert_eq!(PipelineStatus::from_api("running"), PipelineStatus::Running);
        assert_eq!(PipelineStatus::from_api("success"), PipelineStatus::Succeeded);
        assert!(PipelineStatus::from_api("canceled").is_terminal());
        assert!(!PipelineStatus::from_api("something_new").is_terminal());
    }

    #[test]
    fn test_payload_rendering() {
        let payload: PipelinePayload = serde_json::from_str(
            r#"{"success": true, "direct_url": "https://cdn/x.mp4", "title": "T",
                "duration": 95, "channel": "C", "quality": 720}"#,
        )
        .unwrap();
        let resolved = payload.into_resolved().unwrap();
        assert_eq!(resolved.metadata.duration, "95s");
        assert_eq!(resolved.metadata.quality, "720");

        let missing_url: PipelinePayload = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(matches!(
            missing_url.into_resolved(),
            Err(ResolutionError::Extraction { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_trigger_without_token_fails_before_request() {
        let pipeline = HttpExtractionPipeline::new(PipelineConfig {
            trigger_url: "http://127.0.0.1:9/trigger".to_string(),
            ..Default::default()
        })
        .unwrap();

        let result = pipeline.trigger("https://video.example.com/a").await;
        assert!(matches!(result, Err(PipelineCallError::MissingToken)));
    }
}
