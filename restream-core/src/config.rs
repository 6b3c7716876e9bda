//! Centralized configuration for Restream.
//!
//! All tunable parameters live here so encoder, extraction and upload
//! settings are not scattered through the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Missing required configuration: {field}")]
    MissingValue { field: &'static str },
}

/// Central configuration for all Restream components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct RestreamConfig {
    pub encoder: EncoderConfig,
    pub extraction: ExtractionConfig,
    pub pipeline: PipelineConfig,
    pub uploads: UploadConfig,
}

/// Encoder child process configuration.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Encoder binary, resolved through `PATH` when relative
    pub ffmpeg_path: PathBuf,
    /// Ingest base URL; the destination key is appended as the last segment
    pub ingest_url: String,
    /// How long `stop()` waits for the encoder to exit after SIGTERM
    pub stop_timeout: Duration,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ingest_url: "rtmp://a.rtmp.youtube.com/live2".to_string(),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Strategy used to resolve remote URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExtractionStrategy {
    /// Run the extractor in-process and wait for its answer
    #[default]
    Direct,
    /// Delegate extraction to an external trigger-and-poll pipeline
    Pipeline,
}

impl std::str::FromStr for ExtractionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(ExtractionStrategy::Direct),
            "pipeline" => Ok(ExtractionStrategy::Pipeline),
            other => Err(ConfigError::InvalidValue {
                field: "extraction.strategy",
                reason: format!("unknown strategy '{other}'"),
            }),
        }
    }
}

/// Direct extraction configuration.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub strategy: ExtractionStrategy,
    /// Extractor binary used by the direct strategy
    pub ytdlp_path: PathBuf,
    /// Upper bound for a single extractor run
    pub extractor_timeout: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractionStrategy::Direct,
            ytdlp_path: PathBuf::from("yt-dlp"),
            extractor_timeout: Duration::from_secs(60),
        }
    }
}

/// Remote extraction pipeline configuration.
///
/// The pipeline is triggered with a form POST, polled by job identifier
/// and its final payload is read from a fixed result location.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Trigger endpoint receiving the form POST
    pub trigger_url: String,
    /// Status endpoint; `{job_id}` is replaced with the submitted job
    pub status_url: String,
    /// Well-known location of the final extraction payload
    pub result_url: String,
    /// Trigger token sent with every submission
    pub trigger_token: Option<String>,
    /// Token sent as `PRIVATE-TOKEN` on status and result requests
    pub api_token: Option<String>,
    /// Branch or ref the pipeline runs on
    pub git_ref: String,
    /// Name of the pipeline variable carrying the source URL
    pub url_variable: String,
    /// Time between two status polls
    pub poll_interval: Duration,
    /// Wall-clock bound for one resolution
    pub deadline: Duration,
    /// Timeout applied to every individual HTTP request
    pub request_timeout: Duration,
    pub user_agent: &'static str,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trigger_url: String::new(),
            status_url: String::new(),
            result_url: String::new(),
            trigger_token: None,
            api_token: None,
            git_ref: "main".to_string(),
            url_variable: "VIDEO_URL".to_string(),
            poll_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(120),
            request_timeout: Duration::from_secs(15),
            user_agent: "restream/0.1.0",
        }
    }
}

/// Upload catalog configuration.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub upload_dir: PathBuf,
    pub allowed_extensions: &'static [&'static str],
    /// Maximum accepted file size in bytes
    pub max_file_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            allowed_extensions: &["mp4", "avi", "mov", "mkv", "flv", "wmv"],
            max_file_size: 500 * 1024 * 1024, // 500 MiB
        }
    }
}

impl RestreamConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RESTREAM_FFMPEG_PATH") {
            config.encoder.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("RESTREAM_INGEST_URL") {
            config.encoder.ingest_url = url.trim_end_matches('/').to_string();
        }

        if let Some(seconds) = env_seconds("RESTREAM_STOP_TIMEOUT") {
            config.encoder.stop_timeout = seconds;
        }

        if let Ok(strategy) = std::env::var("RESTREAM_EXTRACTION_STRATEGY") {
            match strategy.parse() {
                Ok(strategy) => config.extraction.strategy = strategy,
                Err(e) => tracing::warn!("Ignoring RESTREAM_EXTRACTION_STRATEGY: {}", e),
            }
        }

        if let Ok(path) = std::env::var("RESTREAM_YTDLP_PATH") {
            config.extraction.ytdlp_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("RESTREAM_PIPELINE_TRIGGER_URL") {
            config.pipeline.trigger_url = url;
        }

        if let Ok(url) = std::env::var("RESTREAM_PIPELINE_STATUS_URL") {
            config.pipeline.status_url = url;
        }

        if let Ok(url) = std::env::var("RESTREAM_PIPELINE_RESULT_URL") {
            config.pipeline.result_url = url;
        }

        if let Ok(token) = std::env::var("RESTREAM_PIPELINE_TOKEN") {
            config.pipeline.trigger_token = Some(token);
        }

        if let Ok(token) = std::env::var("RESTREAM_PIPELINE_API_TOKEN") {
            config.pipeline.api_token = Some(token);
        }

        if let Ok(git_ref) = std::env::var("RESTREAM_PIPELINE_REF") {
            config.pipeline.git_ref = git_ref;
        }

        if let Some(interval) = env_seconds("RESTREAM_PIPELINE_POLL_INTERVAL") {
            config.pipeline.poll_interval = interval;
        }

        if let Some(deadline) = env_seconds("RESTREAM_PIPELINE_DEADLINE") {
            config.pipeline.deadline = deadline;
        }

        if let Ok(dir) = std::env::var("RESTREAM_UPLOAD_DIR") {
            config.uploads.upload_dir = PathBuf::from(dir);
        }

        config
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    /// - `ConfigError::MissingValue` - Pipeline strategy selected without endpoints
    /// - `ConfigError::InvalidValue` - Zero poll interval, deadline or stop timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encoder.stop_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "encoder.stop_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.extraction.strategy == ExtractionStrategy::Pipeline {
            if self.pipeline.trigger_url.is_empty() {
                return Err(ConfigError::MissingValue {
                    field: "pipeline.trigger_url",
                });
            }
            if self.pipeline.status_url.is_empty() {
                return Err(ConfigError::MissingValue {
                    field: "pipeline.status_url",
                });
            }
            if self.pipeline.result_url.is_empty() {
                return Err(ConfigError::MissingValue {
                    field: "pipeline.result_url",
                });
            }
        }

        if self.pipeline.poll_interval.is_zero() || self.pipeline.deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.poll_interval",
                reason: "poll interval and deadline must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn env_seconds(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_encoder_contract() {
        let config = RestreamConfig::default();
        assert_eq!(config.encoder.stop_timeout, Duration::from_secs(10));
        assert_eq!(config.pipeline.poll_interval, Duration::from_secs(5));
        assert_eq!(config.pipeline.deadline, Duration::from_secs(120));
        assert_eq!(config.extraction.strategy, ExtractionStrategy::Direct);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_strategy_requires_endpoints() {
        let mut config = RestreamConfig::default();
        config.extraction.strategy = ExtractionStrategy::Pipeline;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingValue {
                field: "pipeline.trigger_url"
            })
        ));

        config.pipeline.trigger_url = "https://ci.example.com/trigger".to_string();
        config.pipeline.status_url = "https://ci.example.com/pipelines/{job_id}".to_string();
        config.pipeline.result_url = "https://ci.example.com/result.json".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "Pipeline".parse::<ExtractionStrategy>().unwrap(),
            ExtractionStrategy::Pipeline
        );
        assert!("carrier-pigeon".parse::<ExtractionStrategy>().is_err());
    }
}
