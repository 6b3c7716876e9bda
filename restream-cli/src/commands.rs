//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Subcommand;
use restream_core::config::ExtractionStrategy;
use restream_core::service::CreateStreamRequest;
use restream_core::stream::FfmpegLauncher;
use restream_core::{
    InMemoryUploadCatalog, RestreamConfig, SourceDescriptor, SourceResolver, StreamRegistry,
    StreamService,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Stream one source until interrupted with Ctrl-C
    Run {
        /// Display name of the stream
        #[arg(short, long)]
        name: String,
        /// Destination stream key
        #[arg(short, long)]
        key: String,
        /// Local video file to stream
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,
        /// Remote video page to resolve and stream
        #[arg(long)]
        url: Option<String>,
        /// Remote resolution strategy, overriding the environment
        #[arg(long, value_enum)]
        strategy: Option<ExtractionStrategy>,
        /// Seconds between status reports
        #[arg(long, default_value = "30")]
        status_interval: u64,
    },
    /// Resolve a remote URL and print the playable source as JSON
    Resolve {
        /// Remote video page
        url: String,
        /// Remote resolution strategy, overriding the environment
        #[arg(long, value_enum)]
        strategy: Option<ExtractionStrategy>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            name,
            key,
            file,
            url,
            strategy,
            status_interval,
        } => run_stream(name, key, file, url, strategy, status_interval).await,
        Commands::Resolve { url, strategy } => resolve_url(url, strategy).await,
    }
}

/// Create and start one stream, then supervise it until Ctrl-C.
///
/// # Errors
/// - Invalid configuration or upload file
/// - Source resolution or encoder start failure
pub async fn run_stream(
    name: String,
    key: String,
    file: Option<PathBuf>,
    url: Option<String>,
    strategy: Option<ExtractionStrategy>,
    status_interval: u64,
) -> anyhow::Result<()> {
    let config = load_config(strategy)?;
    let uploads = Arc::new(InMemoryUploadCatalog::new(config.uploads.clone()));

    let source = match (file, url) {
        (Some(path), _) => {
            let video = uploads
                .register_file(&path, &display_name(&path))
                .await
                .with_context(|| format!("cannot use {} as a source", path.display()))?;
            SourceDescriptor::Local {
                upload_id: video.id,
            }
        }
        (None, Some(url)) => SourceDescriptor::Remote { url },
        (None, None) => bail!("either --file or --url is required"),
    };

    let resolver = SourceResolver::from_config(&config, uploads.clone())?;
    let registry = Arc::new(StreamRegistry::new(
        resolver,
        Arc::new(FfmpegLauncher::new()),
        config.encoder.clone(),
    ));
    let service = StreamService::new(registry.clone(), uploads);

    let created = service
        .create_stream(CreateStreamRequest {
            stream_name: name,
            stream_key: key,
            source,
        })
        .await;
    let Some(view) = created.data else {
        bail!("{}", created.message);
    };
    println!("{}", created.message);
    println!("  Source: {} ({})", view.video_info.title, view.source_type);

    let stream_id = view.stream_id.to_string();
    let started = service.start_stream(&stream_id).await;
    if !started.success {
        bail!("{}", started.message);
    }
    println!("{}", started.message);
    println!("Press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick() => {
                match registry.get(view.stream_id).await {
                    Ok(current) => tracing::info!(
                        "Stream '{}': {} for {}",
                        current.stream_name,
                        current.status,
                        current.duration
                    ),
                    Err(e) => tracing::warn!("Status unavailable: {}", e),
                }
            }
        }
    }

    println!("Stopping...");
    registry.shutdown().await;
    let status = service.status().await;
    println!(
        "Stopped. {} stream(s), {} still active",
        status.total_streams, status.active_streams
    );

    Ok(())
}

/// Resolve a remote URL without streaming it.
///
/// # Errors
/// - Invalid configuration
/// - Source resolution failure
pub async fn resolve_url(url: String, strategy: Option<ExtractionStrategy>) -> anyhow::Result<()> {
    let config = load_config(strategy)?;
    let uploads = Arc::new(InMemoryUploadCatalog::new(config.uploads.clone()));
    let resolver = SourceResolver::from_config(&config, uploads.clone())?;
    let registry = Arc::new(StreamRegistry::new(
        resolver,
        Arc::new(FfmpegLauncher::new()),
        config.encoder.clone(),
    ));

    let result = StreamService::new(registry, uploads)
        .fetch_source_info(&url)
        .await;
    if !result.success {
        bail!("{}", result.message);
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn load_config(strategy: Option<ExtractionStrategy>) -> anyhow::Result<RestreamConfig> {
    let mut config = RestreamConfig::from_env();
    if let Some(strategy) = strategy {
        config.extraction.strategy = strategy;
    }
    config.validate()?;
    Ok(config)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
