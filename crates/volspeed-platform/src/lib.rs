//! # Volspeed Platform
//!
//! Platform-specific adapters for uncached file I/O.
//!
//! This crate hides the differences between the operating systems' ways of
//! keeping the page cache out of a throughput measurement:
//!
//! - Linux: `O_DIRECT` opens and `posix_fadvise` eviction
//! - macOS: `F_NOCACHE` / `F_RDAHEAD` descriptor flags and the `purge` command
//! - Windows: `FILE_FLAG_NO_BUFFERING` handles
//!
//! It also wraps the external direct-copy helper (`dd iflag=direct`) for
//! hosts where none of the native primitives are usable.
//!
//! ## Safety
//!
//! Unbuffered reads require sector-aligned buffers. [`AlignedBuffer`] owns a
//! raw, aligned allocation and releases it on drop; file handles are closed on
//! drop on every exit path.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod aligned;
mod buffered;
pub mod helper;

pub use aligned::{AlignedBuffer, DEFAULT_ALIGNMENT};
pub use buffered::BufferedFile;
pub use helper::{parse_copied_bytes, CopyStats, DirectCopy, DEFAULT_HELPER_TIMEOUT};

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Access denied (need elevated privileges)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Operation not supported on this platform
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The filesystem refused an unbuffered open or read
    #[error("Direct I/O unsupported: {0}")]
    DirectIoUnsupported(String),

    /// Command execution failed
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Command did not finish in time and was killed
    #[error("Command timed out after {}s: {command}", timeout.as_secs())]
    CommandTimeout {
        /// Command line that was run
        command: String,
        /// Bound that was exceeded
        timeout: Duration,
    },

    /// Operation was cancelled while waiting on a command
    #[error("Operation cancelled")]
    Cancelled,

    /// Alignment error for direct I/O
    #[error("Alignment error: {0}")]
    AlignmentError(String),

    /// Aligned allocation failed
    #[error("Failed to allocate {0} bytes of aligned memory")]
    AllocationFailed(usize),
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// How a file is opened for reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheMode {
    /// Native unbuffered open (`O_DIRECT`, `FILE_FLAG_NO_BUFFERING`).
    /// Needs aligned buffers and aligned transfer sizes.
    NoBuffering,
    /// Ordinary open plus per-descriptor "do not cache" and
    /// "no read-ahead" directives.
    NoCache,
    /// Plain buffered reads.
    Buffered,
}

impl CacheMode {
    /// Short name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::NoBuffering => "no-buffering",
            CacheMode::NoCache => "no-cache",
            CacheMode::Buffered => "buffered",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about a file opened for uncached reading
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// File path
    pub path: PathBuf,

    /// File length in bytes at open time
    pub size: u64,

    /// Mode the file was opened with
    pub mode: CacheMode,

    /// Required buffer alignment (1 when no alignment is needed)
    pub alignment: usize,

    /// Why the requested cache bypass could only be partially applied
    pub degraded: Option<String>,
}

/// A file handle opened for sequential reads that bypass the page cache
/// as far as the platform allows.
///
/// Dropping the handle closes it.
pub trait UncachedFile: Send {
    /// Get information about the open file
    fn info(&self) -> &FileInfo;

    /// Read the next chunk into `buffer`, returning the number of bytes read.
    ///
    /// `Ok(0)` means end of file. In [`CacheMode::NoBuffering`] mode the
    /// buffer address and length must be multiples of
    /// [`FileInfo::alignment`].
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize>;
}

/// Platform operations interface
pub trait PlatformOps {
    /// Open a file for sequential uncached reading
    fn open_uncached(path: &Path, mode: CacheMode, alignment: usize)
        -> Result<Box<dyn UncachedFile>>;

    /// Whether the platform offers the given mode at all
    fn supports(mode: CacheMode) -> bool;

    /// Evict a single file's pages from the page cache
    fn drop_file_cache(path: &Path) -> Result<()>;

    /// Flush the whole system's file cache (usually privileged)
    fn purge_system_cache() -> Result<()>;

    /// Check if running with elevated privileges
    fn has_elevated_privileges() -> bool;
}

/// Align a value up to the given alignment
#[inline]
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// Align a value down to the given alignment
#[inline]
pub fn align_down(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    value & !(alignment - 1)
}

/// Check if a value is aligned to the given alignment
// Note: Using manual check instead of `is_multiple_of()` for nightly sanitizer compatibility
#[allow(clippy::manual_is_multiple_of)]
#[inline]
pub fn is_aligned(value: usize, alignment: usize) -> bool {
    if alignment == 0 {
        return true;
    }
    value % alignment == 0
}

/// Check if a pointer is aligned to the given alignment
#[inline]
pub fn is_ptr_aligned<T>(ptr: *const T, alignment: usize) -> bool {
    is_aligned(ptr as usize, alignment)
}

/// Reject a buffer that an unbuffered read would fail on
#[cfg_attr(not(any(target_os = "linux", target_os = "windows")), allow(dead_code))]
pub(crate) fn check_transfer_alignment(buffer: &[u8], alignment: usize) -> Result<()> {
    if !is_ptr_aligned(buffer.as_ptr(), alignment) {
        return Err(PlatformError::AlignmentError(format!(
            "Buffer address {:p} is not aligned to {}",
            buffer.as_ptr(),
            alignment
        )));
    }
    if !is_aligned(buffer.len(), alignment) {
        return Err(PlatformError::AlignmentError(format!(
            "Transfer length {} is not a multiple of {}",
            buffer.len(),
            alignment
        )));
    }
    Ok(())
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::LinuxPlatform as Platform;
    } else if #[cfg(target_os = "macos")] {
        mod macos;
        pub use macos::MacOSPlatform as Platform;
    } else if #[cfg(target_os = "windows")] {
        mod windows;
        pub use windows::WindowsPlatform as Platform;
    } else {
        pub use buffered::GenericPlatform as Platform;
    }
}

/// Open a file for uncached reading using platform defaults
pub fn open_uncached(
    path: &Path,
    mode: CacheMode,
    alignment: usize,
) -> Result<Box<dyn UncachedFile>> {
    Platform::open_uncached(path, mode, alignment)
}

/// Whether this platform offers the given cache mode
pub fn supports(mode: CacheMode) -> bool {
    Platform::supports(mode)
}

/// Evict a file's pages from the page cache
pub fn drop_file_cache(path: &Path) -> Result<()> {
    Platform::drop_file_cache(path)
}

/// Flush the system-wide file cache
pub fn purge_system_cache() -> Result<()> {
    Platform::purge_system_cache()
}

/// Check if running with elevated privileges
pub fn has_elevated_privileges() -> bool {
    Platform::has_elevated_privileges()
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Alignment tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_align_up_basic() {
        assert_eq!(align_up(0, 512), 0);
        assert_eq!(align_up(1, 512), 512);
        assert_eq!(align_up(511, 512), 512);
        assert_eq!(align_up(512, 512), 512);
        assert_eq!(align_up(513, 512), 1024);
    }

    #[test]
    fn test_align_up_zero_alignment() {
        assert_eq!(align_up(100, 0), 100);
        assert_eq!(align_up(0, 0), 0);
    }

    #[test]
    fn test_align_down_basic() {
        assert_eq!(align_down(0, 4096), 0);
        assert_eq!(align_down(4095, 4096), 0);
        assert_eq!(align_down(4096, 4096), 4096);
        assert_eq!(align_down(8191, 4096), 4096);
        assert_eq!(align_down(100, 0), 100);
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(0, 512));
        assert!(is_aligned(1024, 512));
        assert!(!is_aligned(513, 512));
        assert!(is_aligned(100, 0));
    }

    #[test]
    fn test_check_transfer_alignment() {
        let mut buffer = AlignedBuffer::new(8192, 4096).unwrap();
        assert!(check_transfer_alignment(buffer.as_mut_slice(), 4096).is_ok());
        assert!(matches!(
            check_transfer_alignment(&buffer.as_mut_slice()[..100], 4096),
            Err(PlatformError::AlignmentError(_))
        ));
        assert!(matches!(
            check_transfer_alignment(&buffer.as_mut_slice()[1..4097], 4096),
            Err(PlatformError::AlignmentError(_))
        ));
    }

    // -------------------------------------------------------------------------
    // CacheMode tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_cache_mode_display() {
        assert_eq!(CacheMode::NoBuffering.to_string(), "no-buffering");
        assert_eq!(CacheMode::NoCache.to_string(), "no-cache");
        assert_eq!(CacheMode::Buffered.to_string(), "buffered");
    }

    #[test]
    fn test_buffered_always_supported() {
        assert!(supports(CacheMode::Buffered));
    }

    // -------------------------------------------------------------------------
    // Error tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_error_display() {
        let err = PlatformError::PermissionDenied("need root".to_string());
        assert!(err.to_string().contains("Permission denied"));
        assert!(err.to_string().contains("need root"));

        let err = PlatformError::CommandTimeout {
            command: "dd if=x of=/dev/null".to_string(),
            timeout: Duration::from_secs(120),
        };
        assert!(err.to_string().contains("120s"));
        assert!(err.to_string().contains("dd if=x"));

        let err = PlatformError::AllocationFailed(4096);
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let platform_err: PlatformError = io_err.into();
        assert!(matches!(platform_err, PlatformError::Io(_)));
    }
}
