//! Concurrency-safe collection of streams.
//!
//! The table lock only guards structure (insert, remove, enumeration) and is
//! never held across an await. Each stream sits behind its own async mutex,
//! so lifecycle operations on one stream are linearizable while different
//! streams proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EncoderConfig;
use crate::source::{ResolutionError, ResolvedSource, SourceDescriptor, SourceResolver};
use crate::stream::{EncoderLauncher, StreamError, StreamId, StreamManager, StreamView};

/// Errors returned by registry operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("{reason}")]
    Validation { reason: String },

    #[error("Stream not found: {stream_id}")]
    StreamNotFound { stream_id: StreamId },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Registry is shutting down")]
    ShuttingDown,
}

impl RegistryError {
    /// Message suitable for direct display to an operator.
    pub fn user_message(&self) -> String {
        match self {
            RegistryError::StreamNotFound { .. } => "Stream not found".to_string(),
            RegistryError::Resolution(ResolutionError::UploadNotFound { .. }) => {
                "Please select a valid uploaded video".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the failure was caused by the request rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RegistryError::Validation { .. }
                | RegistryError::StreamNotFound { .. }
                | RegistryError::Resolution(
                    ResolutionError::UploadNotFound { .. } | ResolutionError::InvalidUrl { .. }
                )
                | RegistryError::Stream(
                    StreamError::AlreadyRunning { .. } | StreamError::NotRunning { .. }
                )
        )
    }
}

/// Stream totals derived from a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub total: usize,
    pub active: usize,
}

type StreamHandle = Arc<Mutex<StreamManager>>;

#[derive(Default)]
struct StreamTable {
    order: Vec<StreamId>,
    streams: HashMap<StreamId, StreamHandle>,
}

impl StreamTable {
    fn insert(&mut self, id: StreamId, handle: StreamHandle) {
        self.order.push(id);
        self.streams.insert(id, handle);
    }

    fn remove(&mut self, id: StreamId) -> Option<StreamHandle> {
        let handle = self.streams.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        Some(handle)
    }

    fn ordered_handles(&self) -> Vec<StreamHandle> {
        self.order
            .iter()
            .filter_map(|id| self.streams.get(id).cloned())
            .collect()
    }
}

/// Registry of streams keyed by identifier; the single entry point for
/// stream operations.
pub struct StreamRegistry {
    table: RwLock<StreamTable>,
    resolver: SourceResolver,
    launcher: Arc<dyn EncoderLauncher>,
    encoder: EncoderConfig,
    shutdown: CancellationToken,
}

impl StreamRegistry {
    pub fn new(
        resolver: SourceResolver,
        launcher: Arc<dyn EncoderLauncher>,
        encoder: EncoderConfig,
    ) -> Self {
        Self {
            table: RwLock::new(StreamTable::default()),
            resolver,
            launcher,
            encoder,
            shutdown: CancellationToken::new(),
        }
    }

    /// Resolves the source and registers a new `Ready` stream.
    ///
    /// Resolution happens before any lock is taken, so a slow pipeline job
    /// never blocks other registry operations.
    ///
    /// # Errors
    /// - `RegistryError::Validation` - Name or key is empty
    /// - `RegistryError::Resolution` - Source could not be resolved
    /// - `RegistryError::ShuttingDown` - Registry has been shut down
    pub async fn create(
        &self,
        name: &str,
        key: &str,
        descriptor: &SourceDescriptor,
    ) -> Result<StreamId, RegistryError> {
        let name = name.trim();
        let key = key.trim();
        if name.is_empty() || key.is_empty() {
            return Err(RegistryError::Validation {
                reason: "Stream name and key are required".to_string(),
            });
        }
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }

        let cancel = self.shutdown.child_token();
        let source = self.resolver.resolve_with_cancel(descriptor, &cancel).await?;

        let mut table = self.table.write();
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }

        let mut id = StreamId::new();
        while table.streams.contains_key(&id) {
            id = StreamId::new();
        }

        let manager = StreamManager::new(
            id,
            name.to_string(),
            key.to_string(),
            source,
            self.launcher.clone(),
            self.encoder.clone(),
        );
        table.insert(id, Arc::new(Mutex::new(manager)));

        info!(stream_id = %id, "Created stream '{}' ({})", name, descriptor.kind());
        Ok(id)
    }

    /// Starts the stream's encoder and returns its fresh view.
    ///
    /// # Errors
    /// - `RegistryError::StreamNotFound` - Unknown or deleted stream
    /// - `RegistryError::Stream` - `AlreadyRunning` or `StartFailure`
    pub async fn start(&self, id: StreamId) -> Result<StreamView, RegistryError> {
        let handle = self.handle(id)?;
        let mut stream = handle.lock().await;
        if stream.is_retired() {
            return Err(RegistryError::StreamNotFound { stream_id: id });
        }

        stream.start()?;
        Ok(stream.snapshot())
    }

    /// Stops the stream's encoder and returns its fresh view.
    ///
    /// # Errors
    /// - `RegistryError::StreamNotFound` - Unknown or deleted stream
    /// - `RegistryError::Stream` - `NotRunning` or `StopFailure`
    pub async fn stop(&self, id: StreamId) -> Result<StreamView, RegistryError> {
        let handle = self.handle(id)?;
        let mut stream = handle.lock().await;
        if stream.is_retired() {
            return Err(RegistryError::StreamNotFound { stream_id: id });
        }

        stream.stop().await?;
        Ok(stream.snapshot())
    }

    /// Removes a stream, stopping it first when running.
    ///
    /// Returns the stream's last view.
    ///
    /// # Errors
    /// - `RegistryError::StreamNotFound` - Unknown or already deleted stream
    pub async fn delete(&self, id: StreamId) -> Result<StreamView, RegistryError> {
        let handle = self.handle(id)?;
        let view = {
            let mut stream = handle.lock().await;
            if stream.is_retired() {
                return Err(RegistryError::StreamNotFound { stream_id: id });
            }
            stream.retire().await;
            stream.snapshot()
        };

        self.table.write().remove(id);
        info!(stream_id = %id, "Deleted stream '{}'", view.stream_name);
        Ok(view)
    }

    /// Current view of one stream.
    ///
    /// # Errors
    /// - `RegistryError::StreamNotFound` - Unknown or deleted stream
    pub async fn get(&self, id: StreamId) -> Result<StreamView, RegistryError> {
        let handle = self.handle(id)?;
        let stream = handle.lock().await;
        if stream.is_retired() {
            return Err(RegistryError::StreamNotFound { stream_id: id });
        }
        Ok(stream.snapshot())
    }

    /// Views of every current stream in registration order.
    ///
    /// Handles are copied out under the table lock and locked afterwards, so
    /// concurrent inserts and removals never disturb the enumeration.
    pub async fn list(&self) -> Vec<StreamView> {
        let handles = self.table.read().ordered_handles();

        join_all(handles.iter().map(|handle| async move {
            let stream = handle.lock().await;
            (!stream.is_retired()).then(|| stream.snapshot())
        }))
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    pub async fn counts(&self) -> RegistryCounts {
        let views = self.list().await;
        RegistryCounts {
            total: views.len(),
            active: views.iter().filter(|view| view.is_streaming).count(),
        }
    }

    /// Resolves a descriptor without registering a stream.
    ///
    /// # Errors
    /// - `RegistryError::Resolution` - Source could not be resolved
    pub async fn preview(
        &self,
        descriptor: &SourceDescriptor,
    ) -> Result<ResolvedSource, RegistryError> {
        let cancel = self.shutdown.child_token();
        Ok(self.resolver.resolve_with_cancel(descriptor, &cancel).await?)
    }

    /// Cancels in-flight resolutions and stops every running stream.
    ///
    /// Stop failures are logged; streams stay registered.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = self.table.read().ordered_handles();
        info!("Shutting down {} stream(s)", handles.len());

        join_all(handles.iter().map(|handle| async move {
            let mut stream = handle.lock().await;
            if stream.is_streaming()
                && let Err(e) = stream.stop().await
            {
                warn!(stream_id = %stream.id(), "Stop during shutdown failed: {}", e);
            }
        }))
        .await;
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.table.read().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle(&self, id: StreamId) -> Result<StreamHandle, RegistryError> {
        self.table
            .read()
            .streams
            .get(&id)
            .cloned()
            .ok_or(RegistryError::StreamNotFound { stream_id: id })
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("streams", &self.len())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}
