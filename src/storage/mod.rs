//! Where uploaded inputs and rendered outputs live.
//!
//! Every backend keeps working copies on local disk (ffmpeg needs real
//! files). The remote backend additionally pushes finished files to an
//! HTTP object store and hands out public URLs from there.

mod local;
mod remote;

pub use local::LocalStorage;
pub use remote::RemoteStorage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{StorageConfig, StorageKind};

/// Key prefix for rendered videos.
pub const OUTPUTS_PREFIX: &str = "outputs";
/// Key prefix for user uploads.
pub const UPLOADS_PREFIX: &str = "uploads";

pub fn output_key(name: &str) -> String {
    format!("{}/{}", OUTPUTS_PREFIX, name)
}

pub fn upload_key(name: &str) -> String {
    format!("{}/{}", UPLOADS_PREFIX, name)
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Write uploaded bytes into the upload directory.
    async fn save_local(&self, name: &str, data: &[u8]) -> Result<PathBuf>;

    /// Publish a local file under `key` and return its URL.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String>;

    async fn delete_local(&self, path: &Path) -> Result<()>;

    /// URL an object stored under `key` is reachable at.
    fn public_url(&self, key: &str) -> String;

    /// Local path a rendered output named `name` is written to.
    fn output_path(&self, name: &str) -> PathBuf;

    /// Whether `upload` moves files off this machine.
    fn is_remote(&self) -> bool;
}

/// Build the backend selected in the config, creating its directories.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStorage>> {
    let local = LocalStorage::new(&config.upload_dir, &config.output_dir)?;
    match config.kind {
        StorageKind::Local => Ok(Arc::new(local)),
        StorageKind::Remote => {
            let remote = config.remote.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Storage kind is 'remote' but [storage.remote] is missing")
            })?;
            Ok(Arc::new(RemoteStorage::new(local, remote)))
        }
    }
}
