//! Input resolution seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;

/// Where a resolved input lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// The reference already named a local file; it must not be removed.
    Local(PathBuf),
    /// A temporary copy the caller owns and must clean up.
    Downloaded(PathBuf),
}

impl Fetched {
    pub fn path(&self) -> &Path {
        match self {
            Self::Local(p) | Self::Downloaded(p) => p,
        }
    }
}

/// Turns a media reference (local path or URL) into a local file.
#[async_trait]
pub trait InputFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Fetched>;

    /// Directory that holds downloaded copies. Scratch cleanup never
    /// touches anything outside it.
    fn scratch_dir(&self) -> &Path;
}

/// Fetcher for environments where every reference is already local.
#[derive(Debug, Clone)]
pub struct LocalOnly {
    scratch_dir: PathBuf,
}

impl LocalOnly {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl InputFetcher for LocalOnly {
    async fn fetch(&self, reference: &str) -> Result<Fetched> {
        Ok(Fetched::Local(PathBuf::from(reference)))
    }

    fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }
}
