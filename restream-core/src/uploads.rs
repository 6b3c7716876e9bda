//! Catalog of uploaded video files that local streams can be created from

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::config::UploadConfig;

/// Errors raised while registering uploaded files.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid file type: {extension}")]
    UnsupportedExtension { extension: String },

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Upload I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Uploaded file entry.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedVideo {
    pub id: String,
    /// Name of the stored file inside the upload directory
    pub filename: String,
    /// Name the file was uploaded with
    pub original_name: String,
    pub file_path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
    pub size: u64,
}

impl UploadedVideo {
    /// Size rendered in megabytes, e.g. `12.50 MB`.
    pub fn size_label(&self) -> String {
        format!("{:.2} MB", self.size as f64 / (1024.0 * 1024.0))
    }
}

/// Lookup interface the source resolver uses for local descriptors.
pub trait UploadCatalog: Send + Sync + std::fmt::Debug {
    /// Finds an upload by identifier.
    fn lookup(&self, id: &str) -> Option<UploadedVideo>;

    /// Returns every known upload, oldest first.
    fn list(&self) -> Vec<UploadedVideo>;

    /// Number of known uploads.
    fn len(&self) -> usize {
        self.list().len()
    }

    /// Whether the catalog holds no uploads.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory upload catalog.
#[derive(Debug)]
pub struct InMemoryUploadCatalog {
    config: UploadConfig,
    uploads: RwLock<HashMap<String, UploadedVideo>>,
}

impl InMemoryUploadCatalog {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            config,
            uploads: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a file that already exists on disk.
    ///
    /// # Errors
    /// - `UploadError::UnsupportedExtension` - Extension not in the allowed list
    /// - `UploadError::FileTooLarge` - File exceeds the configured size limit
    /// - `UploadError::Io` - File metadata could not be read
    pub async fn register_file(
        &self,
        path: &Path,
        original_name: &str,
    ) -> Result<UploadedVideo, UploadError> {
        self.check_extension(original_name)?;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| UploadError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if metadata.len() > self.config.max_file_size {
            return Err(UploadError::FileTooLarge {
                size: metadata.len(),
                limit: self.config.max_file_size,
            });
        }

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| original_name.to_string());

        let video = UploadedVideo {
            id: Uuid::new_v4().to_string(),
            filename,
            original_name: original_name.to_string(),
            file_path: path.to_path_buf(),
            uploaded_at: Utc::now(),
            size: metadata.len(),
        };

        tracing::info!(
            "Registered upload {} ({}, {})",
            video.id,
            video.original_name,
            video.size_label()
        );

        self.uploads.write().insert(video.id.clone(), video.clone());
        Ok(video)
    }

    /// Storage path for a new upload; the timestamp prefix avoids name clashes.
    pub fn storage_path(&self, original_name: &str) -> PathBuf {
        let sanitized: String = original_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        self.config
            .upload_dir
            .join(format!("{}_{}", Utc::now().timestamp(), sanitized))
    }

    fn check_extension(&self, name: &str) -> Result<(), UploadError> {
        let extension = Path::new(name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if self.config.allowed_extensions.contains(&extension.as_str()) {
            Ok(())
        } else {
            Err(UploadError::UnsupportedExtension { extension })
        }
    }
}

impl UploadCatalog for InMemoryUploadCatalog {
    fn lookup(&self, id: &str) -> Option<UploadedVideo> {
        self.uploads.read().get(id).cloned()
    }

    fn list(&self) -> Vec<UploadedVideo> {
        let mut uploads: Vec<UploadedVideo> = self.uploads.read().values().cloned().collect();
        uploads.sort_by_key(|video| video.uploaded_at);
        uploads
    }

    fn len(&self) -> usize {
        self.uploads.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn catalog() -> InMemoryUploadCatalog {
        InMemoryUploadCatalog::new(UploadConfig::default())
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        file.write_all(&[0u8; 2048]).unwrap();

        let catalog = catalog();
        let video = catalog
            .register_file(file.path(), "holiday.mp4")
            .await
            .unwrap();

        assert_eq!(video.size, 2048);
        assert_eq!(video.original_name, "holiday.mp4");
        assert_eq!(catalog.lookup(&video.id).unwrap().file_path, file.path());
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        let result = catalog().register_file(file.path(), "notes.txt").await;
        assert!(matches!(
            result,
            Err(UploadError::UnsupportedExtension { extension }) if extension == "txt"
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = catalog()
            .register_file(Path::new("/nonexistent/clip.mkv"), "clip.mkv")
            .await;
        assert!(matches!(result, Err(UploadError::Io { .. })));
    }

    #[test]
    fn test_size_label_and_storage_path() {
        let video = UploadedVideo {
            id: "a".to_string(),
            filename: "a.mp4".to_string(),
            original_name: "a.mp4".to_string(),
            file_path: PathBuf::from("uploads/a.mp4"),
            uploaded_at: Utc::now(),
            size: 13_107_200,
        };
        assert_eq!(video.size_label(), "12.50 MB");

        let path = catalog().storage_path("my clip (1).mp4");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_my_clip__1_.mp4"));
        assert!(path.starts_with("uploads"));
    }
}
