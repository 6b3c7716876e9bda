//! Stream lifecycle through the service surface.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use restream_core::config::{EncoderConfig, UploadConfig};
use restream_core::service::CreateStreamRequest;
use restream_core::source::test_mocks::{MockExtractor, sample_media};
use restream_core::source::RemoteStrategy;
use restream_core::stream::EncoderLauncher;
use restream_core::stream::test_mocks::{SleepLauncher, StubbornLauncher};
use restream_core::{
    InMemoryUploadCatalog, RegistryError, SourceDescriptor, SourceResolver, StreamError,
    StreamRegistry, StreamService, StreamState,
};

struct Harness {
    service: StreamService,
    registry: Arc<StreamRegistry>,
    uploads: Arc<InMemoryUploadCatalog>,
}

fn harness(launcher: Arc<dyn EncoderLauncher>, stop_timeout: Duration) -> Harness {
    let uploads = Arc::new(InMemoryUploadCatalog::new(UploadConfig::default()));
    let resolver = SourceResolver::new(
        uploads.clone(),
        RemoteStrategy::Direct(Arc::new(MockExtractor::returning(sample_media()))),
    );
    let registry = Arc::new(StreamRegistry::new(
        resolver,
        launcher,
        EncoderConfig {
            stop_timeout,
            ..Default::default()
        },
    ));
    let service = StreamService::new(registry.clone(), uploads.clone());
    Harness {
        service,
        registry,
        uploads,
    }
}

fn remote(name: &str) -> CreateStreamRequest {
    CreateStreamRequest {
        stream_name: name.to_string(),
        stream_key: format!("{name}-0000-1111-2222"),
        source: SourceDescriptor::Remote {
            url: "https://video.example.com/watch?v=abc".to_string(),
        },
    }
}

#[tokio::test]
async fn test_uploaded_file_streams_with_encoder_template() {
    let launcher = Arc::new(SleepLauncher::new());
    let h = harness(launcher.clone(), Duration::from_secs(10));

    let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    file.write_all(&[7u8; 4096]).unwrap();
    let video = h
        .uploads
        .register_file(file.path(), "holiday.mp4")
        .await
        .unwrap();

    let created = h
        .service
        .create_stream(CreateStreamRequest {
            stream_name: "Holiday".to_string(),
            stream_key: "live-key-abcd-wxyz".to_string(),
            source: SourceDescriptor::Local {
                upload_id: video.id.clone(),
            },
        })
        .await;
    assert!(created.success, "{}", created.message);
    let view = created.data.unwrap();
    assert_eq!(view.video_info.title, "holiday.mp4");
    assert_eq!(view.key_hint, "****wxyz");

    let started = h.service.start_stream(&view.stream_id.to_string()).await;
    assert!(started.success, "{}", started.message);

    let invocations = launcher.invocations();
    assert_eq!(invocations.len(), 1);
    let args = invocations[0].args();
    assert_eq!(args[4], file.path().to_string_lossy());
    assert_eq!(
        args.last().unwrap(),
        "rtmp://a.rtmp.youtube.com/live2/live-key-abcd-wxyz"
    );

    h.registry.shutdown().await;
}

#[tokio::test]
async fn test_delete_while_streaming_leaves_nothing_behind() {
    let h = harness(Arc::new(SleepLauncher::new()), Duration::from_secs(10));
    let id = h.service.create_stream(remote("Doomed")).await.data.unwrap().stream_id;

    h.registry.start(id).await.unwrap();
    let deleted = h.service.delete_stream(&id.to_string()).await;
    assert!(deleted.success);

    for result in [
        h.registry.start(id).await,
        h.registry.stop(id).await,
        h.registry.get(id).await,
        h.registry.delete(id).await,
    ] {
        assert!(matches!(result, Err(RegistryError::StreamNotFound { .. })));
    }
    assert!(h.registry.list().await.is_empty());
}

#[tokio::test]
async fn test_delete_completes_even_when_stop_fails() {
    let h = harness(Arc::new(StubbornLauncher), Duration::from_millis(300));
    let id = h.service.create_stream(remote("Stubborn")).await.data.unwrap().stream_id;

    h.registry.start(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let deleted = h.registry.delete(id).await.unwrap();
    assert_eq!(deleted.status, StreamState::Error);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_slow_stop_does_not_block_other_streams() {
    let h = harness(Arc::new(StubbornLauncher), Duration::from_secs(2));
    let slow = h.service.create_stream(remote("Slow")).await.data.unwrap().stream_id;
    let other = h.service.create_stream(remote("Other")).await.data.unwrap().stream_id;

    h.registry.start(slow).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopping = {
        let registry = h.registry.clone();
        tokio::spawn(async move { registry.stop(slow).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let view = tokio::time::timeout(Duration::from_millis(500), h.registry.get(other))
        .await
        .expect("operation on another stream was blocked")
        .unwrap();
    assert_eq!(view.status, StreamState::Ready);

    let stopped = stopping.await.unwrap();
    assert!(matches!(
        stopped,
        Err(RegistryError::Stream(StreamError::StopFailure { .. }))
    ));

    // Error is recoverable by a fresh start.
    h.registry.start(slow).await.unwrap();
    h.registry.shutdown().await;
}

#[tokio::test]
async fn test_many_concurrent_starts_launch_once() {
    let launcher = Arc::new(SleepLauncher::new());
    let h = harness(launcher.clone(), Duration::from_secs(10));
    let id = h.service.create_stream(remote("Popular")).await.data.unwrap().stream_id;

    let attempts = futures::future::join_all((0..8).map(|_| {
        let registry = h.registry.clone();
        tokio::spawn(async move { registry.start(id).await })
    }))
    .await;

    let successes = attempts
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|result| result.is_ok())
        .count();
    assert_eq!(successes, 1);
    assert_eq!(launcher.launches(), 1);

    let counts = h.registry.counts().await;
    assert_eq!((counts.total, counts.active), (1, 1));
    h.registry.shutdown().await;
}

#[tokio::test]
async fn test_listing_serializes_without_keys() {
    let h = harness(Arc::new(SleepLauncher::new()), Duration::from_secs(10));
    for name in ["one", "two"] {
        h.service.create_stream(remote(name)).await;
    }

    let listing = h.service.list_streams().await;
    let json = serde_json::to_value(&listing).unwrap();

    assert_eq!(json["data"]["total_streams"], 2);
    assert_eq!(json["data"]["active_streams"], 0);
    assert_eq!(json["data"]["streams"][0]["stream_name"], "one");
    assert_eq!(json["data"]["streams"][1]["status"], "Ready");
    assert_eq!(json["data"]["streams"][0]["duration"], "00:00:00");
    assert!(!json.to_string().contains("0000-1111-2222"));
}
