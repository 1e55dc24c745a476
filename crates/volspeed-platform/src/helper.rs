//! External direct-copy helper
//!
//! Runs `dd` with `iflag=direct` to stream a file into `/dev/null`, so the
//! read never passes through the buffered read API of this process. The
//! child is polled rather than waited on so that cancellation and the
//! timeout can kill it.

use crate::{PlatformError, Result};
use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Upper bound on a helper run, sized for tests of a few hundred MB on slow
/// USB 2 media
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a killed child's stderr reader gets to reach EOF
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Outcome of a completed helper run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStats {
    /// Bytes the helper reported copying, if its output could be parsed
    pub bytes: Option<u64>,
    /// Wall-clock duration of the child process
    pub elapsed: Duration,
}

/// Builder and runner for the `dd` direct-copy helper
#[derive(Debug, Clone)]
pub struct DirectCopy {
    program: OsString,
    base_args: Vec<OsString>,
    block_size: usize,
    timeout: Duration,
}

impl DirectCopy {
    /// Helper reading with the given block size
    pub fn new(block_size: usize) -> Self {
        Self {
            program: OsString::from("dd"),
            base_args: Vec::new(),
            block_size,
            timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }

    /// Replace the program, e.g. to run `dd` through a wrapper such as
    /// `ionice`. `base_args` are passed before the dd operands.
    pub fn with_command<I, S>(mut self, program: impl Into<OsString>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.program = program.into();
        self.base_args = base_args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the timeout after which the child is killed
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured timeout
    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// dd operands for reading `path`
    pub fn operands(&self, path: &Path) -> Vec<OsString> {
        let mut input = OsString::from("if=");
        input.push(path.as_os_str());
        vec![
            input,
            OsString::from("of=/dev/null"),
            OsString::from(format!("bs={}", self.block_size)),
            OsString::from("iflag=direct"),
        ]
    }

    /// Printable command line, used in errors and logs
    pub fn command_line(&self, path: &Path) -> String {
        std::iter::once(self.program.clone())
            .chain(self.base_args.iter().cloned())
            .chain(self.operands(path))
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Check whether the helper can be launched and understands GNU options
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .args(&self.base_args)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Run the helper to completion.
    ///
    /// Returns [`PlatformError::Cancelled`] if `cancel` is raised while the
    /// child runs and [`PlatformError::CommandTimeout`] if it outlives the
    /// timeout. The child is killed in both cases.
    pub fn run(&self, path: &Path, cancel: &AtomicBool) -> Result<CopyStats> {
        let command_line = self.command_line(path);
        tracing::debug!("Running {}", command_line);

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(self.operands(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlatformError::NotSupported(format!(
                        "{} not found",
                        self.program.to_string_lossy()
                    ))
                } else {
                    PlatformError::CommandFailed(format!("Failed to run {}: {}", command_line, e))
                }
            })?;

        // Drain stderr on a thread so a chatty child can never block on a full pipe
        let stderr_handle = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buffer = String::new();
                if let Err(e) = stderr.read_to_string(&mut buffer) {
                    tracing::debug!("Failed to read helper output: {}", e);
                }
                buffer
            })
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if cancel.load(Ordering::SeqCst) {
                tracing::debug!("Cancelling {}", command_line);
                let _ = child.kill();
                let _ = child.wait();
                reap_stderr(stderr_handle);
                return Err(PlatformError::Cancelled);
            }

            if started.elapsed() >= self.timeout {
                tracing::warn!(
                    "{} timed out after {}s",
                    command_line,
                    self.timeout.as_secs()
                );
                let _ = child.kill();
                let _ = child.wait();
                let stderr = reap_stderr(stderr_handle);
                if !stderr.trim().is_empty() {
                    tracing::debug!("{} output before timeout: {}", command_line, stderr.trim());
                }
                return Err(PlatformError::CommandTimeout {
                    command: command_line,
                    timeout: self.timeout,
                });
            }

            std::thread::sleep(POLL_INTERVAL);
        };
        let elapsed = started.elapsed();

        let stderr = stderr_handle
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(PlatformError::CommandFailed(format!(
                "{} exited with {:?}: {}",
                command_line,
                status.code(),
                stderr.trim()
            )));
        }

        Ok(CopyStats {
            bytes: parse_copied_bytes(&stderr),
            elapsed,
        })
    }
}

/// Collect the output of a killed child. A grandchild that inherited the
/// pipe can hold it open, so the reader is joined only once it reaches EOF
/// within [`STDERR_GRACE`]; otherwise it is left to finish on its own.
fn reap_stderr(handle: Option<JoinHandle<String>>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };

    let deadline = Instant::now() + STDERR_GRACE;
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    if handle.is_finished() {
        handle.join().unwrap_or_default()
    } else {
        tracing::debug!("Helper output still open after kill; not waiting for it");
        String::new()
    }
}

/// Extract the byte count from dd's transfer summary.
///
/// Understands GNU (`N bytes (...) copied, ...`), BSD
/// (`N bytes transferred in ...`) and busybox output.
pub fn parse_copied_bytes(output: &str) -> Option<u64> {
    output
        .lines()
        .filter(|line| line.contains("bytes"))
        .find_map(|line| line.split_whitespace().next()?.parse().ok())
}
