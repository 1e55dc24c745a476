//! Temporary test file ownership

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Removes the test file when dropped, on every exit path.
///
/// Removal failures are logged, never raised.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    /// Create a uniquely named file in `dir`. Never opens an existing file.
    pub fn create(dir: &Path) -> Result<(Self, File)> {
        let path = dir.join(format!("volspeed_{}.tmp", Uuid::new_v4().simple()));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| Error::Creation {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Created test file {}", path.display());
        Ok((Self { path }, file))
    }

    /// Path of the test file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed test file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove test file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
