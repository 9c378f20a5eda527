use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::BlobStorage;

/// Files stay on this machine and are served by the HTTP server under
/// `/api/{key}`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let upload_dir = upload_dir.into();
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&upload_dir)
            .with_context(|| format!("Failed to create upload dir: {}", upload_dir.display()))?;
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output dir: {}", output_dir.display()))?;
        Ok(Self {
            upload_dir,
            output_dir,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn save_local(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.upload_dir.join(name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to save upload: {}", path.display()))?;
        Ok(path)
    }

    /// Nothing to move; the file is already where it is served from.
    async fn upload(&self, _local_path: &Path, key: &str) -> Result<String> {
        Ok(self.public_url(key))
    }

    async fn delete_local(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to delete local file: {}", path.display()))
    }

    fn public_url(&self, key: &str) -> String {
        format!("/api/{}", key.trim_start_matches('/'))
    }

    fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    fn is_remote(&self) -> bool {
        false
    }
}
