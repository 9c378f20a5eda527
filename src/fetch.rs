//! Remote input downloader.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reelforge_av::{Error, Fetched, InputFetcher, Result};
use reqwest::Client;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::config::DownloadConfig;

/// Fetches `http(s)` references into a temp directory; anything else is
/// treated as a local path and passed through.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    temp_dir: PathBuf,
    max_retries: u32,
    retry_delay: Duration,
}

impl Downloader {
    pub fn new(temp_dir: impl Into<PathBuf>, config: &DownloadConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            temp_dir: temp_dir.into(),
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Base backoff; attempt `i` waits `i × delay` first.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn download_once(&self, url: &str, dest: &Path) -> std::result::Result<(), String> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("http request failed: {e}"))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(format!("http status {status}"));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| format!("failed to create file: {e}"))?;

        let written = async {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| format!("failed to read body: {e}"))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| format!("failed to write file: {e}"))?;
            }
            file.flush()
                .await
                .map_err(|e| format!("failed to write file: {e}"))
        }
        .await;

        if written.is_err() {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
        }
        written
    }
}

#[async_trait]
impl InputFetcher for Downloader {
    async fn fetch(&self, reference: &str) -> Result<Fetched> {
        if !is_url(reference) {
            return Ok(Fetched::Local(PathBuf::from(reference)));
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        // Removed on drop until kept, so an aborted download leaves nothing
        let dest = TempPath::from_path(self.temp_dir.join(format!(
            "{}{}",
            uuid::Uuid::new_v4(),
            url_extension(reference)
        )));

        let mut last_error = String::new();
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
            match self.download_once(reference, &dest).await {
                Ok(()) => {
                    let dest = dest.keep().map_err(|e| {
                        Error::download(reference, format!("failed to keep download: {e}"))
                    })?;
                    tracing::debug!("Downloaded {} to {:?}", reference, dest);
                    return Ok(Fetched::Downloaded(dest));
                }
                Err(e) => {
                    tracing::warn!(
                        "Download attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        self.max_retries,
                        reference,
                        e
                    );
                    last_error = e;
                }
            }
        }

        Err(Error::download(
            reference,
            format!(
                "failed after {} attempts: {}",
                self.max_retries, last_error
            ),
        ))
    }

    fn scratch_dir(&self) -> &Path {
        &self.temp_dir
    }
}

pub fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Extension of the URL path including the dot, or empty.
fn url_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}
