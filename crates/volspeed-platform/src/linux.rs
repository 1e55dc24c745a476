//! Linux platform implementation
//!
//! Uses O_DIRECT for unbuffered reads and posix_fadvise for per-file cache
//! control. Linux has no unprivileged system-wide purge, so eviction is done
//! file by file.

use crate::buffered::{map_open_error, read_retrying};
use crate::{
    check_transfer_alignment, BufferedFile, CacheMode, FileInfo, PlatformError, PlatformOps,
    Result, UncachedFile,
};
use std::fs::{File, OpenOptions as StdOpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Linux platform implementation
pub struct LinuxPlatform;

impl PlatformOps for LinuxPlatform {
    fn open_uncached(
        path: &Path,
        mode: CacheMode,
        alignment: usize,
    ) -> Result<Box<dyn UncachedFile>> {
        match mode {
            CacheMode::NoBuffering => {
                DirectFile::open(path, alignment).map(|f| Box::new(f) as Box<dyn UncachedFile>)
            }
            CacheMode::NoCache => {
                open_with_advice(path).map(|f| Box::new(f) as Box<dyn UncachedFile>)
            }
            CacheMode::Buffered => {
                BufferedFile::open(path).map(|f| Box::new(f) as Box<dyn UncachedFile>)
            }
        }
    }

    fn supports(_mode: CacheMode) -> bool {
        true
    }

    fn drop_file_cache(path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| map_open_error(path, e))?;
        advise(&file, libc::POSIX_FADV_DONTNEED).map_err(PlatformError::Io)
    }

    fn purge_system_cache() -> Result<()> {
        Err(PlatformError::NotSupported(
            "Linux has no unprivileged cache purge; per-file eviction is used instead"
                .to_string(),
        ))
    }

    fn has_elevated_privileges() -> bool {
        // SAFETY: geteuid() is a simple syscall that returns the effective user ID.
        // It has no preconditions and cannot cause undefined behavior.
        #[allow(unsafe_code)]
        unsafe {
            libc::geteuid() == 0
        }
    }
}

/// File opened with O_DIRECT
pub struct DirectFile {
    file: File,
    info: FileInfo,
}

impl DirectFile {
    /// Open a file for O_DIRECT reads.
    ///
    /// Filesystems that cannot do direct I/O (tmpfs on older kernels, some
    /// FUSE mounts) fail with EINVAL, reported as
    /// [`PlatformError::DirectIoUnsupported`].
    pub fn open(path: &Path, alignment: usize) -> Result<Self> {
        let file = StdOpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
            .map_err(|e| {
                if e.raw_os_error() == Some(libc::EINVAL) {
                    PlatformError::DirectIoUnsupported(format!(
                        "{} does not accept O_DIRECT",
                        path.display()
                    ))
                } else {
                    map_open_error(path, e)
                }
            })?;

        let size = file.metadata()?.len();
        tracing::debug!("Opened {} with O_DIRECT ({} bytes)", path.display(), size);

        Ok(Self {
            file,
            info: FileInfo {
                path: path.to_path_buf(),
                size,
                mode: CacheMode::NoBuffering,
                alignment,
                degraded: None,
            },
        })
    }
}

impl UncachedFile for DirectFile {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_transfer_alignment(buffer, self.info.alignment)?;

        read_retrying(&mut self.file, buffer).map_err(|e| {
            if e.raw_os_error() == Some(libc::EINVAL) {
                PlatformError::DirectIoUnsupported(format!(
                    "O_DIRECT read rejected for {}",
                    self.info.path.display()
                ))
            } else {
                PlatformError::Io(e)
            }
        })
    }
}

/// Open normally, evict cached pages and turn off read-ahead.
/// Advice failures degrade the handle instead of failing the open.
fn open_with_advice(path: &Path) -> Result<BufferedFile> {
    let file = File::open(path).map_err(|e| map_open_error(path, e))?;
    let size = file.metadata()?.len();

    let mut problems = Vec::new();
    if let Err(e) = advise(&file, libc::POSIX_FADV_DONTNEED) {
        tracing::warn!("POSIX_FADV_DONTNEED failed on {}: {}", path.display(), e);
        problems.push(format!("cache eviction failed: {}", e));
    }
    // FADV_RANDOM disables read-ahead for this descriptor
    if let Err(e) = advise(&file, libc::POSIX_FADV_RANDOM) {
        tracing::warn!("POSIX_FADV_RANDOM failed on {}: {}", path.display(), e);
        problems.push(format!("read-ahead could not be disabled: {}", e));
    }

    let info = FileInfo {
        path: path.to_path_buf(),
        size,
        mode: CacheMode::NoCache,
        alignment: 1,
        degraded: (!problems.is_empty()).then(|| problems.join("; ")),
    };

    Ok(BufferedFile::from_parts(file, info))
}

/// posix_fadvise over the whole file
fn advise(file: &File, advice: libc::c_int) -> std::io::Result<()> {
    // SAFETY: the fd is valid for the lifetime of `file`; posix_fadvise does
    // not touch memory we own.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, advice) };

    // posix_fadvise returns the error number instead of setting errno
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::from_raw_os_error(rc))
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
