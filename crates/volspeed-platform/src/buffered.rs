//! Plain buffered file reads, available everywhere

use crate::{CacheMode, FileInfo, PlatformError, Result, UncachedFile};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Ordinary file handle. Reads go through the page cache.
pub struct BufferedFile {
    file: File,
    info: FileInfo,
}

impl BufferedFile {
    /// Open a file for buffered sequential reads
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| map_open_error(path, e))?;
        let size = file.metadata()?.len();

        Ok(Self {
            file,
            info: FileInfo {
                path: path.to_path_buf(),
                size,
                mode: CacheMode::Buffered,
                alignment: 1,
                degraded: None,
            },
        })
    }

    /// Wrap an already opened file. Used by the platform modules when a
    /// cache directive is applied after opening.
    #[cfg_attr(not(unix), allow(dead_code))]
    pub(crate) fn from_parts(file: File, info: FileInfo) -> Self {
        Self { file, info }
    }
}

impl UncachedFile for BufferedFile {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        read_retrying(&mut self.file, buffer).map_err(PlatformError::Io)
    }
}

/// Read once, retrying on EINTR
pub(crate) fn read_retrying(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match file.read(buffer) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Translate an open failure into the matching platform error
pub(crate) fn map_open_error(path: &Path, e: std::io::Error) -> PlatformError {
    match e.kind() {
        ErrorKind::NotFound => PlatformError::FileNotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => {
            PlatformError::PermissionDenied(format!("Cannot open {}: {}", path.display(), e))
        }
        _ => PlatformError::Io(e),
    }
}

/// Fallback for platforms without any cache-control primitives
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub struct GenericPlatform;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
impl crate::PlatformOps for GenericPlatform {
    fn open_uncached(
        path: &Path,
        mode: CacheMode,
        _alignment: usize,
    ) -> Result<Box<dyn UncachedFile>> {
        match mode {
            CacheMode::Buffered => {
                BufferedFile::open(path).map(|f| Box::new(f) as Box<dyn UncachedFile>)
            }
            other => Err(PlatformError::NotSupported(format!(
                "{} reads are not available on this platform",
                other
            ))),
        }
    }

    fn supports(mode: CacheMode) -> bool {
        mode == CacheMode::Buffered
    }

    fn drop_file_cache(_path: &Path) -> Result<()> {
        Err(PlatformError::NotSupported(
            "Per-file cache eviction not available".to_string(),
        ))
    }

    fn purge_system_cache() -> Result<()> {
        Err(PlatformError::NotSupported(
            "System cache purge not available".to_string(),
        ))
    }

    fn has_elevated_privileges() -> bool {
        false
    }
}
