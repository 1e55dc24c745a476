//! Parameters of one speed-test run

use crate::error::{Error, Result};
use crate::units::{format_size, MIB};
use std::path::{Path, PathBuf};

/// Default amount of data written and read back
pub const DEFAULT_TEST_SIZE: u64 = 100 * MIB;

/// Default transfer size per chunk
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Smallest accepted buffer; also the unbuffered I/O alignment
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;

/// Largest accepted buffer
pub const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// What to measure and where.
///
/// Fixed once built; the engine validates it before touching the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    target_directory: PathBuf,
    test_size: u64,
    buffer_size: usize,
}

impl TestRequest {
    /// A request for `test_size` bytes in `target_directory` with the
    /// default buffer size
    pub fn new(target_directory: impl Into<PathBuf>, test_size: u64) -> Self {
        Self {
            target_directory: target_directory.into(),
            test_size,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the transfer size per chunk
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Directory the temporary file is created in
    pub fn target_directory(&self) -> &Path {
        &self.target_directory
    }

    /// Bytes to write and read back
    pub fn test_size(&self) -> u64 {
        self.test_size
    }

    /// Transfer size per chunk
    pub fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Check the request before any I/O. The target directory is not
    /// inspected; a missing one surfaces as [`Error::Creation`].
    pub fn validate(&self) -> Result<()> {
        if self.test_size == 0 {
            return Err(Error::InvalidRequest(
                "test size must be greater than zero".to_string(),
            ));
        }

        if !self.buffer_size.is_power_of_two() {
            return Err(Error::InvalidRequest(format!(
                "buffer size {} is not a power of two",
                self.buffer_size
            )));
        }

        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(Error::InvalidRequest(format!(
                "buffer size {} must be between {} and {}",
                format_size(self.buffer_size as u64),
                format_size(MIN_BUFFER_SIZE as u64),
                format_size(MAX_BUFFER_SIZE as u64)
            )));
        }

        Ok(())
    }
}
