//! Restream Core - multi-stream video re-streaming
//!
//! This crate provides source resolution (uploads, direct extraction and
//! trigger-and-poll pipelines), per-stream encoder supervision, and a
//! concurrency-safe registry tying them together.

pub mod config;
pub mod registry;
pub mod service;
pub mod source;
pub mod stream;
pub mod tracing_setup;
pub mod uploads;

// Re-export main types for convenient access
pub use config::{ConfigError, RestreamConfig};
pub use registry::{RegistryCounts, RegistryError, StreamRegistry};
pub use service::{OperationResult, StreamService};
pub use source::{ResolutionError, ResolvedSource, SourceDescriptor, SourceResolver};
pub use stream::{StreamError, StreamId, StreamManager, StreamState, StreamView};
pub use uploads::{InMemoryUploadCatalog, UploadCatalog, UploadError};

/// Core errors that can bubble up from any Restream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RestreamError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ResolutionError> for RestreamError {
    fn from(error: ResolutionError) -> Self {
        RestreamError::Registry(RegistryError::Resolution(error))
    }
}

impl From<StreamError> for RestreamError {
    fn from(error: StreamError) -> Self {
        RestreamError::Registry(RegistryError::Stream(error))
    }
}

impl RestreamError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            RestreamError::Config(e) => format!("Configuration error: {e}"),
            RestreamError::Upload(UploadError::UnsupportedExtension { .. }) => {
                "Invalid file type".to_string()
            }
            RestreamError::Upload(UploadError::FileTooLarge { .. }) => {
                "File is too large".to_string()
            }
            RestreamError::Upload(UploadError::Io { .. }) => "Upload could not be read".to_string(),
            RestreamError::Registry(e) => e.user_message(),
            RestreamError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        match self {
            RestreamError::Config(_) => true,
            RestreamError::Upload(e) => !matches!(e, UploadError::Io { .. }),
            RestreamError::Registry(e) => e.is_user_error(),
            RestreamError::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RestreamError>;
