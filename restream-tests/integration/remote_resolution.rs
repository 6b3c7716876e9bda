//! Remote sources resolved through the extraction pipeline, end to end.

use std::sync::Arc;
use std::time::Duration;

use restream_core::config::{EncoderConfig, ExtractionStrategy, RestreamConfig, UploadConfig};
use restream_core::service::CreateStreamRequest;
use restream_core::source::test_mocks::ScriptedPipeline;
use restream_core::source::{
    PipelineCallError, PipelinePayload, PipelineResolver, PipelineStatus, RemoteStrategy,
};
use restream_core::stream::test_mocks::SleepLauncher;
use restream_core::{
    InMemoryUploadCatalog, RegistryError, ResolutionError, SourceDescriptor, SourceResolver,
    StreamRegistry, StreamService,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const URL: &str = "https://video.example.com/watch?v=remote";

fn registry_with(pipeline: Arc<ScriptedPipeline>) -> Arc<StreamRegistry> {
    let resolver = SourceResolver::new(
        Arc::new(InMemoryUploadCatalog::new(UploadConfig::default())),
        RemoteStrategy::Pipeline(PipelineResolver::new(
            pipeline,
            Duration::from_secs(5),
            Duration::from_secs(120),
        )),
    );
    Arc::new(StreamRegistry::new(
        resolver,
        Arc::new(SleepLauncher::new()),
        EncoderConfig::default(),
    ))
}

fn remote() -> SourceDescriptor {
    SourceDescriptor::Remote {
        url: URL.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_job_becomes_ready_stream() {
    let pipeline = Arc::new(ScriptedPipeline::new().with_statuses([
        PipelineStatus::Pending,
        PipelineStatus::Running,
        PipelineStatus::Succeeded,
    ]));
    let registry = registry_with(pipeline.clone());

    let started = Instant::now();
    let id = registry.create("Piped", "key", &remote()).await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(15));

    let view = registry.get(id).await.unwrap();
    assert_eq!(view.source_path, "https://cdn.example.com/pipeline.mp4");
    assert_eq!(view.video_info.title, "Pipeline video");
    assert_eq!(view.video_info.duration, "300s");
    assert_eq!(pipeline.triggered_urls(), vec![URL]);
    assert_eq!(pipeline.fetch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_job_times_out_without_registering() {
    let pipeline = Arc::new(ScriptedPipeline::new().with_fallback(PipelineStatus::Running));
    let registry = registry_with(pipeline.clone());

    let started = Instant::now();
    let result = registry.create("Stuck", "key", &remote()).await;

    assert!(matches!(
        result,
        Err(RegistryError::Resolution(ResolutionError::Timeout { .. }))
    ));
    assert_eq!(started.elapsed(), Duration::from_secs(120));
    assert_eq!(pipeline.status_call_times().len(), 24);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_resolution_does_not_block_registry() {
    let pipeline = Arc::new(ScriptedPipeline::new().with_fallback(PipelineStatus::Pending));
    let registry = registry_with(pipeline);

    let pending = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.create("Slow", "key", &remote()).await })
    };
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(registry.counts().await.total, 0);
    assert!(registry.list().await.is_empty());

    registry.shutdown().await;
    assert!(matches!(
        pending.await.unwrap(),
        Err(RegistryError::Resolution(ResolutionError::Cancelled { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_failures_surface_as_messages() {
    let failed = registry_with(Arc::new(
        ScriptedPipeline::new().with_statuses([PipelineStatus::Failed("failed".to_string())]),
    ));
    let service = StreamService::new(
        failed,
        Arc::new(InMemoryUploadCatalog::new(UploadConfig::default())),
    );
    let result = service
        .create_stream(CreateStreamRequest {
            stream_name: "Broken".to_string(),
            stream_key: "key".to_string(),
            source: remote(),
        })
        .await;
    assert!(!result.success);
    assert!(result.message.contains("failed"), "{}", result.message);

    let no_url = registry_with(Arc::new(
        ScriptedPipeline::new()
            .with_statuses([PipelineStatus::Succeeded])
            .with_payload(PipelinePayload {
                success: false,
                direct_url: None,
                error: Some("Sign in to confirm your age".to_string()),
                title: None,
                duration: None,
                channel: None,
                quality: None,
            }),
    ));
    match no_url.preview(&remote()).await {
        Err(RegistryError::Resolution(ResolutionError::Extraction { reason })) => {
            assert!(reason.contains("Sign in to confirm your age"))
        }
        other => panic!("expected extraction error, got {other:?}"),
    }

    let rejected = registry_with(Arc::new(ScriptedPipeline::new().with_trigger_error(
        PipelineCallError::Rejected {
            status: 403,
            body: "forbidden".to_string(),
        },
    )));
    assert!(matches!(
        rejected.preview(&remote()).await,
        Err(RegistryError::Resolution(ResolutionError::Submission { .. }))
    ));
}

#[tokio::test]
async fn test_http_pipeline_unreachable_trigger_is_submission_error() {
    let mut config = RestreamConfig::default();
    config.extraction.strategy = ExtractionStrategy::Pipeline;
    config.pipeline.trigger_url = "http://127.0.0.1:1/trigger".to_string();
    config.pipeline.status_url = "http://127.0.0.1:1/jobs/{job_id}".to_string();
    config.pipeline.result_url = "http://127.0.0.1:1/result".to_string();
    config.pipeline.trigger_token = Some("trigger-token".to_string());
    config.pipeline.request_timeout = Duration::from_secs(2);
    config.validate().unwrap();

    let resolver = SourceResolver::from_config(
        &config,
        Arc::new(InMemoryUploadCatalog::new(config.uploads.clone())),
    )
    .unwrap();

    let result = resolver
        .resolve_with_cancel(&remote(), &CancellationToken::new())
        .await;
    match result {
        Err(ResolutionError::Submission { reason }) => {
            assert!(!reason.contains("trigger-token"))
        }
        other => panic!("expected submission error, got {other:?}"),
    }
}
