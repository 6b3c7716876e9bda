//! Source resolution: turning a caller-supplied descriptor into a playable
//! locator plus descriptive metadata.
//!
//! Local descriptors are looked up in the upload catalog. Remote URLs go
//! through one of two strategies: a direct extractor run, or a
//! trigger-and-poll job against an external extraction pipeline.

pub mod extractor;
pub mod pipeline;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use extractor::{ExtractedMedia, MediaExtractor, MediaFormat, PlayableFormat, YtDlpExtractor};
pub use pipeline::{
    ExtractionJob, ExtractionPipeline, HttpExtractionPipeline, PipelineCallError,
    PipelinePayload, PipelineResolver, PipelineStatus,
};

use crate::config::{ConfigError, ExtractionStrategy, RestreamConfig};
use crate::uploads::UploadCatalog;

/// Placeholder used for metadata the source could not provide.
pub const UNKNOWN: &str = "Unknown";

/// Errors that can occur while resolving a source descriptor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("Upload not found: {upload_id}")]
    UploadNotFound { upload_id: String },

    #[error("Invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to submit extraction job: {reason}")]
    Submission { reason: String },

    #[error("Extraction pipeline job {job_id} failed with status '{status}'")]
    Pipeline { job_id: String, status: String },

    #[error("Extraction job {job_id} did not finish within {waited_secs} seconds")]
    Timeout { job_id: String, waited_secs: u64 },

    #[error("Failed to extract video info: {reason}")]
    Extraction { reason: String },

    #[error("Extraction job {job_id} was cancelled")]
    Cancelled { job_id: String },
}

/// Kind of source a stream plays from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A file from the upload catalog
    Local,
    /// A remote page URL that needs extraction
    Remote,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Local => write!(f, "local"),
            SourceKind::Remote => write!(f, "remote"),
        }
    }
}

/// Caller-supplied reference to a video source, not yet playable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Local { upload_id: String },
    Remote { url: String },
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Local { .. } => SourceKind::Local,
            SourceDescriptor::Remote { .. } => SourceKind::Remote,
        }
    }
}

/// Descriptive metadata attached to a resolved source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMetadata {
    pub title: String,
    pub duration: String,
    pub quality: String,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl SourceMetadata {
    /// Metadata with only a title known.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            duration: UNKNOWN.to_string(),
            quality: UNKNOWN.to_string(),
            channel: UNKNOWN.to_string(),
            views: None,
            size: None,
        }
    }
}

/// Concrete playable locator with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSource {
    /// File path or playable URL, usable directly as encoder input
    pub locator: String,
    pub kind: SourceKind,
    pub metadata: SourceMetadata,
}

/// How remote URLs are resolved.
#[derive(Debug, Clone)]
pub enum RemoteStrategy {
    Direct(Arc<dyn MediaExtractor>),
    Pipeline(PipelineResolver),
}

/// Resolves descriptors into playable sources.
///
/// Holds no reference to what it resolved; results are handed over by value.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    uploads: Arc<dyn UploadCatalog>,
    remote: RemoteStrategy,
}

impl SourceResolver {
    pub fn new(uploads: Arc<dyn UploadCatalog>, remote: RemoteStrategy) -> Self {
        Self { uploads, remote }
    }

    /// Builds a resolver with the remote strategy selected in configuration.
    ///
    /// # Errors
    /// - `ConfigError::InvalidValue` - The pipeline HTTP client could not be built
    pub fn from_config(
        config: &RestreamConfig,
        uploads: Arc<dyn UploadCatalog>,
    ) -> Result<Self, ConfigError> {
        let remote = match config.extraction.strategy {
            ExtractionStrategy::Direct => {
                RemoteStrategy::Direct(Arc::new(YtDlpExtractor::new(&config.extraction)))
            }
            ExtractionStrategy::Pipeline => {
                let pipeline = HttpExtractionPipeline::new(config.pipeline.clone())?;
                RemoteStrategy::Pipeline(PipelineResolver::new(
                    Arc::new(pipeline),
                    config.pipeline.poll_interval,
                    config.pipeline.deadline,
                ))
            }
        };

        Ok(Self::new(uploads, remote))
    }

    /// Resolves a descriptor without external cancellation.
    ///
    /// # Errors
    /// See [`SourceResolver::resolve_with_cancel`].
    pub async fn resolve(
        &self,
        descriptor: &SourceDescriptor,
    ) -> Result<ResolvedSource, ResolutionError> {
        self.resolve_with_cancel(descriptor, &CancellationToken::new())
            .await
    }

    /// Resolves a descriptor, abandoning any pipeline polling once `cancel` fires.
    ///
    /// # Errors
    /// - `ResolutionError::UploadNotFound` - Local reference not in the catalog
    /// - `ResolutionError::InvalidUrl` - Remote reference is not an http(s) URL
    /// - `ResolutionError::Extraction` - Extractor or pipeline result reported a failure
    /// - `ResolutionError::Submission` - Pipeline trigger rejected the job
    /// - `ResolutionError::Pipeline` - Pipeline job finished in a failed state
    /// - `ResolutionError::Timeout` - Pipeline job did not finish before the deadline
    /// - `ResolutionError::Cancelled` - `cancel` fired while waiting on the pipeline
    pub async fn resolve_with_cancel(
        &self,
        descriptor: &SourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ResolutionError> {
        match descriptor {
            SourceDescriptor::Local { upload_id } => self.resolve_upload(upload_id),
            SourceDescriptor::Remote { url } => {
                validate_remote_url(url)?;
                match &self.remote {
                    RemoteStrategy::Direct(extractor) => {
                        tracing::info!("Extracting media info for {}", url);
                        let media = extractor.extract(url).await?;
                        media.into_resolved()
                    }
                    RemoteStrategy::Pipeline(resolver) => resolver.resolve(url, cancel).await,
                }
            }
        }
    }

    fn resolve_upload(&self, upload_id: &str) -> Result<ResolvedSource, ResolutionError> {
        let video =
            self.uploads
                .lookup(upload_id)
                .ok_or_else(|| ResolutionError::UploadNotFound {
                    upload_id: upload_id.to_string(),
                })?;

        let mut metadata = SourceMetadata::titled(video.original_name.clone());
        metadata.size = Some(video.size_label());

        Ok(ResolvedSource {
            locator: video.file_path.to_string_lossy().into_owned(),
            kind: SourceKind::Local,
            metadata,
        })
    }
}

fn validate_remote_url(raw: &str) -> Result<(), ResolutionError> {
    let parsed = url::Url::parse(raw).map_err(|e| ResolutionError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ResolutionError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::test_mocks::{MockExtractor, ScriptedPipeline, sample_media};
    use super::*;
    use crate::config::UploadConfig;
    use crate::uploads::InMemoryUploadCatalog;

    fn catalog() -> Arc<InMemoryUploadCatalog> {
        Arc::new(InMemoryUploadCatalog::new(UploadConfig::default()))
    }

    #[tokio::test]
    async fn test_local_descriptor_uses_catalog_entry() {
        let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        file.write_all(b"not really a video").unwrap();

        let uploads = catalog();
        let video = uploads
            .register_file(file.path(), "launch.mp4")
            .await
            .unwrap();

        let resolver = SourceResolver::new(
            uploads,
            RemoteStrategy::Direct(Arc::new(MockExtractor::returning(sample_media()))),
        );
        let resolved = resolver
            .resolve(&SourceDescriptor::Local {
                upload_id: video.id.clone(),
            })
            .await
            .unwrap();

        assert_eq!(resolved.kind, SourceKind::Local);
        assert_eq!(resolved.locator, file.path().to_string_lossy());
        assert_eq!(resolved.metadata.title, "launch.mp4");
        assert_eq!(resolved.metadata.duration, UNKNOWN);
        assert_eq!(resolved.metadata.quality, UNKNOWN);
    }

    #[tokio::test]
    async fn test_unknown_upload_is_not_found() {
        let resolver = SourceResolver::new(
            catalog(),
            RemoteStrategy::Direct(Arc::new(MockExtractor::returning(sample_media()))),
        );
        let result = resolver
            .resolve(&SourceDescriptor::Local {
                upload_id: "missing".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ResolutionError::UploadNotFound { .. })));
    }

    #[tokio::test]
    async fn test_direct_strategy_selects_best_format() {
        let extractor = Arc::new(MockExtractor::returning(sample_media()));
        let resolver = SourceResolver::new(catalog(), RemoteStrategy::Direct(extractor.clone()));

        let resolved = resolver
            .resolve(&SourceDescriptor::Remote {
                url: "https://video.example.com/watch?v=abc".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(resolved.kind, SourceKind::Remote);
        assert_eq!(resolved.locator, "https://cdn.example.com/720p.mp4");
        assert_eq!(resolved.metadata.quality, "720p");
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn test_direct_strategy_surfaces_provider_message() {
        let resolver = SourceResolver::new(
            catalog(),
            RemoteStrategy::Direct(Arc::new(MockExtractor::failing("Video unavailable"))),
        );
        let result = resolver
            .resolve(&SourceDescriptor::Remote {
                url: "https://video.example.com/watch?v=gone".to_string(),
            })
            .await;

        match result {
            Err(ResolutionError::Extraction { reason }) => {
                assert!(reason.contains("Video unavailable"))
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let extractor = Arc::new(MockExtractor::returning(sample_media()));
        let resolver = SourceResolver::new(catalog(), RemoteStrategy::Direct(extractor.clone()));

        for url in ["file:///etc/passwd", "not a url"] {
            let result = resolver
                .resolve(&SourceDescriptor::Remote {
                    url: url.to_string(),
                })
                .await;
            assert!(matches!(result, Err(ResolutionError::InvalidUrl { .. })));
        }
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_strategy_is_routed_through_poll_loop() {
        let pipeline = Arc::new(ScriptedPipeline::new().with_statuses([PipelineStatus::Succeeded]));
        let resolver = SourceResolver::new(
            catalog(),
            RemoteStrategy::Pipeline(PipelineResolver::new(
                pipeline.clone(),
                Duration::from_secs(5),
                Duration::from_secs(120),
            )),
        );

        let resolved = resolver
            .resolve(&SourceDescriptor::Remote {
                url: "https://video.example.com/watch?v=abc".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(resolved.locator, "https://cdn.example.com/pipeline.mp4");
        assert_eq!(pipeline.triggered_urls(), vec!["https://video.example.com/watch?v=abc"]);
    }

    #[test]
    fn test_descriptor_serde_shape() {
        let descriptor: SourceDescriptor =
            serde_json::from_str(r#"{"kind":"remote","url":"https://x.example"}"#).unwrap();
        assert_eq!(descriptor.kind(), SourceKind::Remote);
    }
}
