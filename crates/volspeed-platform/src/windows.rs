//! Windows platform implementation
//!
//! Opens files with CreateFileW and FILE_FLAG_NO_BUFFERING, which bypasses the
//! system file cache entirely. Transfers must be sector aligned.

use crate::{
    check_transfer_alignment, BufferedFile, CacheMode, FileInfo, PlatformError, PlatformOps,
    Result, UncachedFile,
};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_HANDLE_EOF,
    ERROR_PATH_NOT_FOUND, ERROR_SHARING_VIOLATION, GENERIC_READ, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, GetFileSizeEx, ReadFile, FILE_ATTRIBUTE_NORMAL, FILE_FLAG_NO_BUFFERING,
    FILE_FLAG_SEQUENTIAL_SCAN, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

/// Windows platform implementation
pub struct WindowsPlatform;

impl PlatformOps for WindowsPlatform {
    fn open_uncached(
        path: &Path,
        mode: CacheMode,
        alignment: usize,
    ) -> Result<Box<dyn UncachedFile>> {
        match mode {
            CacheMode::NoBuffering => {
                NoBufferingFile::open(path, alignment).map(|f| Box::new(f) as Box<dyn UncachedFile>)
            }
            CacheMode::NoCache => Err(PlatformError::NotSupported(
                "Windows has no per-handle cache directive; use FILE_FLAG_NO_BUFFERING"
                    .to_string(),
            )),
            CacheMode::Buffered => {
                BufferedFile::open(path).map(|f| Box::new(f) as Box<dyn UncachedFile>)
            }
        }
    }

    fn supports(mode: CacheMode) -> bool {
        mode != CacheMode::NoCache
    }

    fn drop_file_cache(_path: &Path) -> Result<()> {
        Err(PlatformError::NotSupported(
            "Per-file cache eviction not available on Windows".to_string(),
        ))
    }

    fn purge_system_cache() -> Result<()> {
        Err(PlatformError::NotSupported(
            "System cache purge not available on Windows".to_string(),
        ))
    }

    fn has_elevated_privileges() -> bool {
        let mut token: HANDLE = 0;
        // SAFETY: the pseudo handle needs no closing; token is a valid out pointer.
        #[allow(unsafe_code)]
        let opened = unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) };
        if opened == 0 {
            tracing::debug!(
                "Cannot open process token: {}",
                std::io::Error::last_os_error()
            );
            return false;
        }

        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut returned: u32 = 0;
        // SAFETY: elevation is sized as passed; token was opened above and
        // is closed exactly once.
        #[allow(unsafe_code)]
        let queried = unsafe {
            let queried = GetTokenInformation(
                token,
                TokenElevation,
                (&mut elevation as *mut TOKEN_ELEVATION).cast(),
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            );
            CloseHandle(token);
            queried
        };

        queried != 0 && elevation.TokenIsElevated != 0
    }
}

/// File handle opened with FILE_FLAG_NO_BUFFERING. Closed on drop.
pub struct NoBufferingFile {
    handle: HANDLE,
    info: FileInfo,
}

// SAFETY: the handle is owned exclusively by this struct and Win32 file
// handles may be used from any thread.
#[allow(unsafe_code)]
unsafe impl Send for NoBufferingFile {}

impl NoBufferingFile {
    /// Open a file for unbuffered sequential reads
    pub fn open(path: &Path, alignment: usize) -> Result<Self> {
        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL terminated and outlives the call.
        #[allow(unsafe_code)]
        let handle = unsafe {
            CreateFileW(
                wide_path.as_ptr(),
                GENERIC_READ,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_NO_BUFFERING | FILE_FLAG_SEQUENTIAL_SCAN,
                0,
            )
        };

        if handle == INVALID_HANDLE_VALUE {
            let error = std::io::Error::last_os_error();
            let display = path.display().to_string();
            return Err(match error.raw_os_error().map(|c| c as u32) {
                Some(ERROR_ACCESS_DENIED) => {
                    PlatformError::PermissionDenied(format!("Cannot open {}", display))
                }
                Some(ERROR_SHARING_VIOLATION) => {
                    PlatformError::Io(std::io::Error::other(format!("{} is in use", display)))
                }
                Some(ERROR_FILE_NOT_FOUND) | Some(ERROR_PATH_NOT_FOUND) => {
                    PlatformError::FileNotFound(display)
                }
                _ => PlatformError::Io(error),
            });
        }

        // Construct first so the handle is closed if the size query fails
        let mut file = Self {
            handle,
            info: FileInfo {
                path: path.to_path_buf(),
                size: 0,
                mode: CacheMode::NoBuffering,
                alignment,
                degraded: None,
            },
        };

        let mut size: i64 = 0;
        // SAFETY: handle is valid, size is a valid out pointer.
        #[allow(unsafe_code)]
        let result = unsafe { GetFileSizeEx(file.handle, &mut size) };
        if result == 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        file.info.size = size as u64;

        tracing::debug!(
            "Opened {} with FILE_FLAG_NO_BUFFERING ({} bytes)",
            path.display(),
            file.info.size
        );

        Ok(file)
    }
}

impl UncachedFile for NoBufferingFile {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_transfer_alignment(buffer, self.info.alignment)?;

        let mut bytes_read: u32 = 0;
        // SAFETY: buffer is valid for buffer.len() bytes and stays borrowed
        // for the duration of the synchronous call.
        #[allow(unsafe_code)]
        let result = unsafe {
            ReadFile(
                self.handle,
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                &mut bytes_read,
                ptr::null_mut(),
            )
        };

        if result == 0 {
            let error = std::io::Error::last_os_error();
            if error.raw_os_error() == Some(ERROR_HANDLE_EOF as i32) {
                return Ok(0);
            }
            return Err(PlatformError::Io(error));
        }

        Ok(bytes_read as usize)
    }
}

impl Drop for NoBufferingFile {
    fn drop(&mut self) {
        // SAFETY: handle came from CreateFileW and is closed exactly once.
        #[allow(unsafe_code)]
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
