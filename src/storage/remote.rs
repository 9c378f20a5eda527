use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use super::{BlobStorage, LocalStorage};
use crate::config::RemoteStorageConfig;

/// Upload timeout; rendered videos can be large.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP object store accepting `PUT {endpoint}/{bucket}/{key}` with a bearer
/// token. Working copies still go through a [`LocalStorage`].
pub struct RemoteStorage {
    local: LocalStorage,
    client: Client,
    endpoint: String,
    bucket: String,
    access_token: String,
    public_base_url: String,
}

impl RemoteStorage {
    pub fn new(local: LocalStorage, config: &RemoteStorageConfig) -> Self {
        let client = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            local,
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.trim_matches('/').to_string(),
            access_token: config.access_token.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl BlobStorage for RemoteStorage {
    async fn save_local(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        self.local.save_local(name, data).await
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<String> {
        let data = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {} for upload", local_path.display()))?;

        let mut request = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        if !self.access_token.is_empty() {
            request = request.bearer_auth(&self.access_token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", key))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Upload of {} failed ({}): {}", key, status, body);
        }

        tracing::debug!("Uploaded {} to {}", local_path.display(), key);
        Ok(self.public_url(key))
    }

    async fn delete_local(&self, path: &Path) -> Result<()> {
        self.local.delete_local(path).await
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }

    fn output_path(&self, name: &str) -> PathBuf {
        self.local.output_path(name)
    }

    fn is_remote(&self) -> bool {
        true
    }
}
