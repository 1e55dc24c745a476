//! Error types for the Volspeed core library

use crate::progress::Phase;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use volspeed_platform::PlatformError;

/// Main error type for speed-test operations
#[derive(Error, Debug)]
pub enum Error {
    /// The request failed validation before any I/O
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The temporary test file could not be created
    #[error("Cannot create test file {}: {source}", path.display())]
    Creation {
        /// Path of the file that could not be created
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// IO error during the write or read phase
    #[error("IO error while {}: {source}", phase.activity())]
    Io {
        /// Phase the error happened in
        phase: Phase,
        /// The underlying error
        source: std::io::Error,
    },

    /// A cache-control primitive could not be applied. Never fatal; carried
    /// as a warning so callers can flag optimistic numbers.
    #[error("Cache bypass unavailable: {0}")]
    CacheBypassUnavailable(String),

    /// The external read helper exceeded its time bound
    #[error("Timed out after {}s waiting for: {command}", timeout.as_secs())]
    SubprocessTimeout {
        /// Command line that was run
        command: String,
        /// Bound that was exceeded
        timeout: Duration,
    },

    /// The external read helper failed
    #[error("Read helper failed: {0}")]
    HelperFailed(String),

    /// The read phase did not see every byte the write phase produced
    #[error("Size mismatch: wrote {written} bytes, read {read} bytes")]
    SizeMismatch {
        /// Bytes written
        written: u64,
        /// Bytes read back
        read: u64,
    },

    /// The background worker could not be started or died without a result
    #[error("Speed-test worker failed: {0}")]
    Worker(String),

    /// Other platform failure
    #[error(transparent)]
    Platform(PlatformError),

    /// Operation was cancelled
    #[error("Speed test cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap an IO error raised during `phase`
    pub fn io(phase: Phase, source: std::io::Error) -> Self {
        Error::Io { phase, source }
    }

    /// Whether this is the cancellation outcome rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Platform errors only surface while clearing caches or reading back, so a
/// bare IO error is attributed to the read phase.
impl From<PlatformError> for Error {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Io(source) => Error::Io {
                phase: Phase::Reading,
                source,
            },
            PlatformError::Cancelled => Error::Cancelled,
            PlatformError::CommandTimeout { command, timeout } => {
                Error::SubprocessTimeout { command, timeout }
            }
            PlatformError::CommandFailed(msg) => Error::HelperFailed(msg),
            PlatformError::DirectIoUnsupported(msg) => Error::CacheBypassUnavailable(msg),
            other => Error::Platform(other),
        }
    }
}

/// Result type alias using the Volspeed error type
pub type Result<T> = std::result::Result<T, Error>;
