//! Operation surface consumed by an outer request layer.
//!
//! Every operation recovers its errors into an [`OperationResult`] carrying
//! a display-ready message, so no failure escapes to the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::registry::{RegistryError, StreamRegistry};
use crate::source::{ResolvedSource, SourceDescriptor};
use crate::stream::{StreamId, StreamView};
use crate::uploads::{UploadCatalog, UploadedVideo};

/// Outcome of one operation: success flag, message, optional payload.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    fn from_error(operation: &str, error: &RegistryError) -> Self {
        if error.is_user_error() {
            tracing::debug!("{} rejected: {}", operation, error);
        } else {
            warn!("{} failed: {}", operation, error);
        }
        Self::failed(error.user_message())
    }
}

/// Request to register a new stream.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStreamRequest {
    pub stream_name: String,
    pub stream_key: String,
    #[serde(flatten)]
    pub source: SourceDescriptor,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamListing {
    pub streams: Vec<StreamView>,
    pub total_streams: usize,
    pub active_streams: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub total_streams: usize,
    pub active_streams: usize,
    pub uploaded_videos: usize,
    pub system_status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// Stream operations with display-ready results.
#[derive(Debug, Clone)]
pub struct StreamService {
    registry: Arc<StreamRegistry>,
    uploads: Arc<dyn UploadCatalog>,
}

impl StreamService {
    pub fn new(registry: Arc<StreamRegistry>, uploads: Arc<dyn UploadCatalog>) -> Self {
        Self { registry, uploads }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub async fn create_stream(&self, request: CreateStreamRequest) -> OperationResult<StreamView> {
        let created = self
            .registry
            .create(&request.stream_name, &request.stream_key, &request.source)
            .await;

        let view = match created {
            Ok(id) => self.registry.get(id).await,
            Err(e) => Err(e),
        };

        match view {
            Ok(view) => OperationResult::ok(
                format!("Stream \"{}\" created successfully", view.stream_name),
                view,
            ),
            Err(e) => OperationResult::from_error("Create stream", &e),
        }
    }

    pub async fn start_stream(&self, stream_id: &str) -> OperationResult<StreamView> {
        let Some(id) = parse_id(stream_id) else {
            return OperationResult::failed("Stream not found");
        };

        match self.registry.start(id).await {
            Ok(view) => OperationResult::ok(
                format!("Stream '{}' started successfully", view.stream_name),
                view,
            ),
            Err(e) => OperationResult::from_error("Start stream", &e),
        }
    }

    pub async fn stop_stream(&self, stream_id: &str) -> OperationResult<StreamView> {
        let Some(id) = parse_id(stream_id) else {
            return OperationResult::failed("Stream not found");
        };

        match self.registry.stop(id).await {
            Ok(view) => OperationResult::ok(
                format!("Stream '{}' stopped successfully", view.stream_name),
                view,
            ),
            Err(e) => OperationResult::from_error("Stop stream", &e),
        }
    }

    pub async fn delete_stream(&self, stream_id: &str) -> OperationResult<StreamView> {
        let Some(id) = parse_id(stream_id) else {
            return OperationResult::failed("Stream not found");
        };

        match self.registry.delete(id).await {
            Ok(view) => OperationResult::ok(
                format!("Stream \"{}\" deleted successfully", view.stream_name),
                view,
            ),
            Err(e) => OperationResult::from_error("Delete stream", &e),
        }
    }

    pub async fn list_streams(&self) -> OperationResult<StreamListing> {
        let streams = self.registry.list().await;
        let active_streams = streams.iter().filter(|view| view.is_streaming).count();
        let listing = StreamListing {
            total_streams: streams.len(),
            active_streams,
            streams,
        };
        OperationResult::ok(format!("{} stream(s)", listing.total_streams), listing)
    }

    pub fn uploaded_videos(&self) -> OperationResult<Vec<UploadedVideo>> {
        let videos = self.uploads.list();
        OperationResult::ok(format!("{} uploaded video(s)", videos.len()), videos)
    }

    /// Resolves a remote URL without creating a stream.
    pub async fn fetch_source_info(&self, url: &str) -> OperationResult<ResolvedSource> {
        let url = url.trim();
        if url.is_empty() {
            return OperationResult::failed("URL is required");
        }

        let descriptor = SourceDescriptor::Remote {
            url: url.to_string(),
        };
        match self.registry.preview(&descriptor).await {
            Ok(source) => OperationResult::ok("Video info fetched successfully", source),
            Err(e) => OperationResult::from_error("Fetch source info", &e),
        }
    }

    pub async fn status(&self) -> SystemStatus {
        let counts = self.registry.counts().await;
        SystemStatus {
            total_streams: counts.total,
            active_streams: counts.active,
            uploaded_videos: self.uploads.len(),
            system_status: "healthy",
        }
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus { status: "healthy" }
    }
}

fn parse_id(raw: &str) -> Option<StreamId> {
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::{EncoderConfig, UploadConfig};
    use crate::source::test_mocks::{MockExtractor, sample_media};
    use crate::source::{RemoteStrategy, SourceResolver};
    use crate::stream::StreamState;
    use crate::stream::test_mocks::SleepLauncher;
    use crate::uploads::InMemoryUploadCatalog;

    fn service_with(uploads: Arc<InMemoryUploadCatalog>) -> StreamService {
        let resolver = SourceResolver::new(
            uploads.clone(),
            RemoteStrategy::Direct(Arc::new(MockExtractor::returning(sample_media()))),
        );
        let registry = Arc::new(StreamRegistry::new(
            resolver,
            Arc::new(SleepLauncher::new()),
            EncoderConfig::default(),
        ));
        StreamService::new(registry, uploads)
    }

    fn service() -> StreamService {
        service_with(Arc::new(InMemoryUploadCatalog::new(UploadConfig::default())))
    }

    fn remote_request(name: &str) -> CreateStreamRequest {
        CreateStreamRequest {
            stream_name: name.to_string(),
            stream_key: "abcd-efgh-ijkl-mnop".to_string(),
            source: SourceDescriptor::Remote {
                url: "https://video.example.com/watch?v=abc".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_messages() {
        let service = service();

        let created = service.create_stream(remote_request("Evening")).await;
        assert!(created.success);
        assert_eq!(created.message, "Stream \"Evening\" created successfully");
        let id = created.data.unwrap().stream_id.to_string();

        let started = service.start_stream(&id).await;
        assert_eq!(started.message, "Stream 'Evening' started successfully");
        assert_eq!(started.data.unwrap().status, StreamState::Streaming);

        let again = service.start_stream(&id).await;
        assert!(!again.success);
        assert_eq!(again.message, "Stream 'Evening' is already running");

        let stopped = service.stop_stream(&id).await;
        assert_eq!(stopped.message, "Stream 'Evening' stopped successfully");

        let deleted = service.delete_stream(&id).await;
        assert_eq!(deleted.message, "Stream \"Evening\" deleted successfully");

        let gone = service.start_stream(&id).await;
        assert!(!gone.success);
        assert_eq!(gone.message, "Stream not found");
    }

    #[tokio::test]
    async fn test_malformed_identifier_is_not_found() {
        let service = service();
        for result in [
            service.start_stream("nope").await,
            service.stop_stream("").await,
            service.delete_stream("1234").await,
        ] {
            assert!(!result.success);
            assert_eq!(result.message, "Stream not found");
        }
    }

    #[tokio::test]
    async fn test_create_validation_message() {
        let service = service();
        let mut request = remote_request("   ");
        request.stream_key = String::new();

        let result = service.create_stream(request).await;
        assert!(!result.success);
        assert_eq!(result.message, "Stream name and key are required");
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn test_create_request_from_json() {
        let request: CreateStreamRequest = serde_json::from_str(
            r#"{"stream_name":"Clip","stream_key":"k","kind":"local","upload_id":"missing"}"#,
        )
        .unwrap();

        let result = service().create_stream(request).await;
        assert!(!result.success);
        assert_eq!(result.message, "Please select a valid uploaded video");
    }

    #[tokio::test]
    async fn test_listing_status_and_uploads() {
        let mut file = tempfile::Builder::new().suffix(".mkv").tempfile().unwrap();
        file.write_all(&[0u8; 2048]).unwrap();
        let uploads = Arc::new(InMemoryUploadCatalog::new(UploadConfig::default()));
        let video = uploads.register_file(file.path(), "intro.mkv").await.unwrap();
        let service = service_with(uploads);

        let local = service
            .create_stream(CreateStreamRequest {
                stream_name: "Local".to_string(),
                stream_key: "key-local".to_string(),
                source: SourceDescriptor::Local {
                    upload_id: video.id.clone(),
                },
            })
            .await;
        let local_id = local.data.unwrap().stream_id.to_string();
        service.create_stream(remote_request("Remote")).await;
        service.start_stream(&local_id).await;

        let listing = service.list_streams().await.data.unwrap();
        assert_eq!(listing.total_streams, 2);
        assert_eq!(listing.active_streams, 1);
        assert_eq!(listing.streams[0].video_info.title, "intro.mkv");

        let status = service.status().await;
        assert_eq!(
            (status.total_streams, status.active_streams, status.uploaded_videos),
            (2, 1, 1)
        );
        assert_eq!(status.system_status, "healthy");
        assert_eq!(service.uploaded_videos().data.unwrap().len(), 1);
        assert_eq!(service.health().status, "healthy");

        service.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_source_info() {
        let service = service();

        let empty = service.fetch_source_info("  ").await;
        assert_eq!(empty.message, "URL is required");

        let info = service
            .fetch_source_info("https://video.example.com/watch?v=abc")
            .await;
        assert!(info.success);
        assert_eq!(info.data.unwrap().metadata.quality, "720p");
    }

    #[tokio::test]
    async fn test_serialized_result_never_contains_key() {
        let service = service();
        let created = service.create_stream(remote_request("Secretive")).await;
        let json = serde_json::to_string(&created).unwrap();
        assert!(!json.contains("abcd-efgh-ijkl-mnop"));
        assert!(json.contains("\"success\":true"));
    }
}
