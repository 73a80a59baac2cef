use crate::traits::{FileStore, FileStoreError, FileStoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;

/// Local filesystem file store.
#[derive(Clone)]
pub struct LocalFileStore {
    base_path: PathBuf,
}

impl LocalFileStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> FileStoreResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            FileStoreError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalFileStore { base_path })
    }

    /// Convert a storage path to a filesystem path, rejecting traversal
    /// sequences that could escape the base directory.
    fn resolve(&self, storage_path: &str) -> FileStoreResult<PathBuf> {
        if storage_path.contains("..") || storage_path.starts_with('/') {
            return Err(FileStoreError::InvalidPath(
                "Storage path contains invalid components".to_string(),
            ));
        }
        Ok(self.base_path.join(storage_path))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn fetch(&self, storage_path: &str) -> FileStoreResult<Bytes> {
        let path = self.resolve(storage_path)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(FileStoreError::NotFound(storage_path.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            FileStoreError::FetchFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            path = %path.display(),
            size_bytes = data.len(),
            "Local file fetched"
        );

        Ok(Bytes::from(data))
    }

    async fn exists(&self, storage_path: &str) -> FileStoreResult<bool> {
        let path = self.resolve(storage_path)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn content_length(&self, storage_path: &str) -> FileStoreResult<u64> {
        let path = self.resolve(storage_path)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileStoreError::NotFound(storage_path.to_string()))
            }
            Err(e) => Err(FileStoreError::IoError(e)),
        }
    }
}
