use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// File store operation errors.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// The 404-equivalent: the storage path does not resolve to a file.
    /// Drives the `missing_remote_file` terminal state and is never retried.
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl FileStoreError {
    /// Transient errors are subject to the orchestrator's retry policy;
    /// everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FileStoreError::FetchFailed(_)
                | FileStoreError::BackendError(_)
                | FileStoreError::IoError(_)
        )
    }
}

pub type FileStoreResult<T> = Result<T, FileStoreError>;

/// Read-only view of wherever the uploaded case files live.
///
/// The pipeline never writes here; uploads belong to the intake surface.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Fetch the file at the given storage path.
    async fn fetch(&self, storage_path: &str) -> FileStoreResult<Bytes>;

    /// Check whether a file exists without fetching its content.
    async fn exists(&self, storage_path: &str) -> FileStoreResult<bool>;

    /// Size in bytes of the file, if it exists.
    async fn content_length(&self, storage_path: &str) -> FileStoreResult<u64>;
}
