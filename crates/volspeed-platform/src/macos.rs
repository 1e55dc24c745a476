//! macOS platform implementation
//!
//! macOS has no O_DIRECT. Caching is switched off per descriptor with
//! F_NOCACHE and read-ahead with F_RDAHEAD; pages already cached from the
//! write phase can only be dropped with the `purge` command, which needs root.

use crate::buffered::map_open_error;
use crate::{BufferedFile, CacheMode, FileInfo, PlatformError, PlatformOps, Result, UncachedFile};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::{Command, Stdio};

/// macOS platform implementation
pub struct MacOSPlatform;

impl PlatformOps for MacOSPlatform {
    fn open_uncached(
        path: &Path,
        mode: CacheMode,
        _alignment: usize,
    ) -> Result<Box<dyn UncachedFile>> {
        match mode {
            CacheMode::NoBuffering => Err(PlatformError::NotSupported(
                "macOS has no unbuffered open mode; use F_NOCACHE".to_string(),
            )),
            CacheMode::NoCache => {
                open_nocache(path).map(|f| Box::new(f) as Box<dyn UncachedFile>)
            }
            CacheMode::Buffered => {
                BufferedFile::open(path).map(|f| Box::new(f) as Box<dyn UncachedFile>)
            }
        }
    }

    fn supports(mode: CacheMode) -> bool {
        mode != CacheMode::NoBuffering
    }

    fn drop_file_cache(_path: &Path) -> Result<()> {
        Err(PlatformError::NotSupported(
            "macOS cannot evict a single file's pages".to_string(),
        ))
    }

    fn purge_system_cache() -> Result<()> {
        tracing::debug!("Running purge");

        // Never run through sudo: purge only succeeds if we already have root
        let output = Command::new("purge")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| PlatformError::CommandFailed(format!("Failed to run purge: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else if !Self::has_elevated_privileges() {
            Err(PlatformError::PermissionDenied(
                "purge requires root privileges".to_string(),
            ))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PlatformError::CommandFailed(format!(
                "purge exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )))
        }
    }

    fn has_elevated_privileges() -> bool {
        // SAFETY: geteuid() has no preconditions.
        #[allow(unsafe_code)]
        unsafe {
            libc::geteuid() == 0
        }
    }
}

/// Open a file and apply F_NOCACHE and F_RDAHEAD. Either directive failing
/// leaves a readable but degraded handle.
fn open_nocache(path: &Path) -> Result<BufferedFile> {
    let file = File::open(path).map_err(|e| map_open_error(path, e))?;
    let size = file.metadata()?.len();

    let mut problems = Vec::new();
    if let Err(e) = set_fcntl(&file, libc::F_NOCACHE, 1) {
        tracing::warn!("F_NOCACHE failed on {}: {}", path.display(), e);
        problems.push(format!("F_NOCACHE failed: {}", e));
    }
    if let Err(e) = set_fcntl(&file, libc::F_RDAHEAD, 0) {
        tracing::warn!("F_RDAHEAD failed on {}: {}", path.display(), e);
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

fn set_fcntl(file: &File, command: libc::c_int, value: libc::c_int) -> std::io::Result<()> {
    // SAFETY: fd is valid for the lifetime of `file`; both commands take an
    // int argument.
    #[allow(unsafe_code)]
    let result = unsafe { libc::fcntl(file.as_raw_fd(), command, value) };

    if result == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_nocache_regular_file() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&[0u8; 8192]).unwrap();

        let mut file = open_nocache(temp.path()).unwrap();
        assert_eq!(file.info().mode, CacheMode::NoCache);
        assert!(file.info().degraded.is_none());

        let mut buffer = vec![0u8; 4096];
        assert_eq!(file.read_chunk(&mut buffer).unwrap(), 4096);
    }

    #[test]
    fn test_no_buffering_not_supported() {
        let temp = NamedTempFile::new().unwrap();
        let result = MacOSPlatform::open_uncached(temp.path(), CacheMode::NoBuffering, 4096);
        assert!(matches!(result, Err(PlatformError::NotSupported(_))));
        assert!(!MacOSPlatform::supports(CacheMode::NoBuffering));
    }

    #[test]
    fn test_open_nonexistent_file() {
        let result = open_nocache(Path::new("/nonexistent/volspeed.tmp"));
        assert!(matches!(result, Err(PlatformError::FileNotFound(_))));
    }

    #[test]
    fn test_has_elevated_privileges() {
        let _ = MacOSPlatform::has_elevated_privileges();
    }
}
