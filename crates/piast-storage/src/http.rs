use crate::traits::{FileStore, FileStoreError, FileStoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;

const FETCH_TIMEOUT_SECS: u64 = 60;

/// File store backed by the remote file gateway (cloud file-sync service).
///
/// Status mapping: 404/410 become `NotFound` (terminal), everything else that
/// fails maps to a transient backend error.
#[derive(Clone)]
pub struct HttpFileStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpFileStore {
    pub fn new(base_url: String, token: Option<String>) -> FileStoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                FileStoreError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url_for(&self, storage_path: &str) -> FileStoreResult<String> {
        if storage_path.contains("..") || storage_path.starts_with('/') {
            return Err(FileStoreError::InvalidPath(
                "Storage path contains invalid components".to_string(),
            ));
        }
        Ok(format!("{}/{}", self.base_url, storage_path))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn fetch(&self, storage_path: &str) -> FileStoreResult<Bytes> {
        let url = self.url_for(storage_path)?;

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| FileStoreError::FetchFailed(format!("Request to file gateway failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => {
                let data = response.bytes().await.map_err(|e| {
                    FileStoreError::FetchFailed(format!("Failed to read response body: {}", e))
                })?;
                tracing::debug!(
                    storage_path = %storage_path,
                    size_bytes = data.len(),
                    "Remote file fetched"
                );
                Ok(data)
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(FileStoreError::NotFound(storage_path.to_string()))
            }
            status => Err(FileStoreError::BackendError(format!(
                "File gateway returned {}",
                status
            ))),
        }
    }

    async fn exists(&self, storage_path: &str) -> FileStoreResult<bool> {
        let url = self.url_for(storage_path)?;

        let response = self
            .authorize(self.client.head(&url))
            .send()
            .await
            .map_err(|e| FileStoreError::FetchFailed(format!("Request to file gateway failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
            status => Err(FileStoreError::BackendError(format!(
                "File gateway returned {}",
                status
            ))),
        }
    }

    async fn content_length(&self, storage_path: &str) -> FileStoreResult<u64> {
        let url = self.url_for(storage_path)?;

        let response = self
            .authorize(self.client.head(&url))
            .send()
            .await
            .map_err(|e| FileStoreError::FetchFailed(format!("Request to file gateway failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(response.content_length().unwrap_or(0)),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(FileStoreError::NotFound(storage_path.to_string()))
            }
            status => Err(FileStoreError::BackendError(format!(
                "File gateway returned {}",
                status
            ))),
        }
    }
}
