//! Mock extraction backends for testing source resolution.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::extractor::{ExtractedMedia, MediaExtractor, MediaFormat};
use super::pipeline::{ExtractionPipeline, PipelineCallError, PipelinePayload, PipelineStatus};
use super::ResolutionError;

/// Provider response with encodings ordered weakest first, where only the
/// first (240p) and last (720p) carry both audio and video.
pub fn sample_media() -> ExtractedMedia {
    let format = |url: &str, vcodec: &str, acodec: &str, note: &str| MediaFormat {
        url: Some(url.to_string()),
        vcodec: Some(vcodec.to_string()),
        acodec: Some(acodec.to_string()),
        format_note: Some(note.to_string()),
        height: None,
    };

    ExtractedMedia {
        title: Some("Sample broadcast".to_string()),
        duration: Some(3600.0),
        uploader: Some("Sample channel".to_string()),
        view_count: Some(42),
        url: Some("https://cdn.example.com/best-effort.mp4".to_string()),
        formats: vec![
            format("https://cdn.example.com/240p.mp4", "avc1", "mp4a", "240p"),
            format("https://cdn.example.com/audio.m4a", "none", "mp4a", "audio only"),
            format("https://cdn.example.com/1080p.webm", "vp9", "none", "1080p"),
            format("https://cdn.example.com/720p.mp4", "avc1", "mp4a", "720p"),
        ],
    }
}

/// Extractor returning a fixed response.
#[derive(Debug)]
pub struct MockExtractor {
    response: Result<ExtractedMedia, String>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn returning(media: ExtractedMedia) -> Self {
        Self {
            response: Ok(media),
            calls: AtomicUsize::new(0),
        }
    }

    /// Extractor failing every call with the provider message `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaExtractor for MockExtractor {
    async fn extract(&self, _url: &str) -> Result<ExtractedMedia, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .clone()
            .map_err(|reason| ResolutionError::Extraction { reason })
    }
}

/// Pipeline replaying a scripted sequence of status responses.
///
/// Once the script is exhausted every status call returns the fallback.
#[derive(Debug)]
pub struct ScriptedPipeline {
    trigger: Result<String, PipelineCallError>,
    statuses: Mutex<VecDeque<Result<PipelineStatus, PipelineCallError>>>,
    fallback: PipelineStatus,
    payload: Result<PipelinePayload, PipelineCallError>,
    triggered: Mutex<Vec<String>>,
    status_calls: Mutex<Vec<Instant>>,
    fetch_calls: AtomicUsize,
}

impl Default for ScriptedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPipeline {
    /// Pipeline that accepts jobs, stays pending and serves a successful payload.
    pub fn new() -> Self {
        Self {
            trigger: Ok("4242".to_string()),
            statuses: Mutex::new(VecDeque::new()),
            fallback: PipelineStatus::Pending,
            payload: Ok(PipelinePayload {
                success: true,
                direct_url: Some("https://cdn.example.com/pipeline.mp4".to_string()),
                error: None,
                title: Some("Pipeline video".to_string()),
                duration: Some(serde_json::json!(300)),
                channel: Some("Pipeline channel".to_string()),
                quality: Some(serde_json::json!("1080p")),
            }),
            triggered: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_statuses(self, statuses: impl IntoIterator<Item = PipelineStatus>) -> Self {
        self.with_status_results(statuses.into_iter().map(Ok))
    }

    pub fn with_status_results(
        self,
        results: impl IntoIterator<Item = Result<PipelineStatus, PipelineCallError>>,
    ) -> Self {
        self.statuses.lock().extend(results);
        self
    }

    pub fn with_fallback(mut self, status: PipelineStatus) -> Self {
        self.fallback = status;
        self
    }

    pub fn with_trigger_error(mut self, error: PipelineCallError) -> Self {
        self.trigger = Err(error);
        self
    }

    pub fn with_payload(mut self, payload: PipelinePayload) -> Self {
        self.payload = Ok(payload);
        self
    }

    pub fn with_fetch_error(mut self, error: PipelineCallError) -> Self {
        self.payload = Err(error);
        self
    }

    /// URLs submitted through `trigger`.
    pub fn triggered_urls(&self) -> Vec<String> {
        self.triggered.lock().clone()
    }

    /// Instants at which `status` was called.
    pub fn status_call_times(&self) -> Vec<Instant> {
        self.status_calls.lock().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionPipeline for ScriptedPipeline {
    async fn trigger(&self, url: &str) -> Result<String, PipelineCallError> {
        self.triggered.lock().push(url.to_string());
        self.trigger.clone()
    }

    async fn status(&self, _job_id: &str) -> Result<PipelineStatus, PipelineCallError> {
        self.status_calls.lock().push(Instant::now());
        self.statuses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    async fn fetch_result(&self, _job_id: &str) -> Result<PipelinePayload, PipelineCallError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.payload.clone()
    }
}
