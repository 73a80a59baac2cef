use crate::http::HttpFileStore;
use crate::local::LocalFileStore;
use crate::traits::{FileStore, FileStoreError, FileStoreResult};
use piast_core::Config;
use std::sync::Arc;

/// Build the file store named by `FILE_STORAGE_BACKEND`.
pub async fn create_file_store(config: &Config) -> FileStoreResult<Arc<dyn FileStore>> {
    match config.storage_backend.as_str() {
        "local" => {
            let base_path = config.local_storage_path.clone().ok_or_else(|| {
                FileStoreError::ConfigError(
                    "LOCAL_STORAGE_PATH must be set for the local storage backend".to_string(),
                )
            })?;
            let store = LocalFileStore::new(base_path).await?;
            tracing::info!(backend = "local", "File store initialized");
            Ok(Arc::new(store))
        }
        "http" => {
            let base_url = config.remote_file_base_url.clone().ok_or_else(|| {
                FileStoreError::ConfigError(
                    "REMOTE_FILE_BASE_URL must be set for the http storage backend".to_string(),
                )
            })?;
            let store = HttpFileStore::new(base_url, config.remote_file_token.clone())?;
            tracing::info!(backend = "http", "File store initialized");
            Ok(Arc::new(store))
        }
        other => Err(FileStoreError::ConfigError(format!(
            "Unknown storage backend: {}",
            other
        ))),
    }
}
