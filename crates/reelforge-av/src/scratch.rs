//! Cleanup guard for downloaded inputs.

use std::path::{Path, PathBuf};

use crate::fetch::Fetched;

/// Owns temporary input files and removes them when dropped.
///
/// Only paths inside the scratch root are ever removed, so a `Local`
/// input that happens to be recorded by mistake survives.
///
/// # Example
///
/// ```
/// use reelforge_av::{Fetched, ScratchFiles};
///
/// let dir = tempfile::tempdir()?;
/// let copy = dir.path().join("download.jpg");
/// std::fs::write(&copy, b"jpeg")?;
///
/// let mut scratch = ScratchFiles::new(dir.path());
/// scratch.record(&Fetched::Downloaded(copy.clone()));
/// drop(scratch);
/// assert!(!copy.exists());
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct ScratchFiles {
    root: PathBuf,
    files: Vec<PathBuf>,
}

impl ScratchFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Vec::new(),
        }
    }

    /// Track a fetched input if it is a downloaded copy.
    pub fn record(&mut self, fetched: &Fetched) {
        if let Fetched::Downloaded(path) = fetched {
            self.files.push(path.clone());
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in std::mem::take(&mut self.files) {
            if !self.owns(&path) {
                tracing::warn!("Refusing to remove {:?}: outside {:?}", path, self.root);
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed scratch file {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove scratch file {:?}: {}", path, e),
            }
        }
    }
}
