//! Uncached read strategies
//!
//! How the read phase keeps the page cache out of its measurement depends
//! on what the platform offers. Each way is a [`ReadStrategy`]; one is
//! chosen when the engine is built and the orchestration never branches on
//! the platform itself.
//!
//! | Kind          | Mechanism                                   | Accuracy    |
//! |---------------|---------------------------------------------|-------------|
//! | `direct`      | `O_DIRECT` / `FILE_FLAG_NO_BUFFERING`       | physical    |
//! | `nocache`     | `F_NOCACHE` + `F_RDAHEAD` + `purge`         | physical*   |
//! | `dd`          | `dd iflag=direct of=/dev/null`              | physical    |
//! | `buffered`    | plain reads                                 | cached      |
//!
//! \* approximate when the purge or the descriptor flags cannot be applied.

use crate::error::{Error, Result};
use crate::progress::{read_percent, read_phase_percent, Phase, ProgressReporter};
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use volspeed_platform::{
    AlignedBuffer, CacheMode, DirectCopy, PlatformError, UncachedFile, DEFAULT_ALIGNMENT,
    DEFAULT_HELPER_TIMEOUT,
};

/// How far a measured read speed can be trusted to reflect the medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    /// Data may have come from the page cache
    Cached,
    /// Cache bypass was only partially applied
    Approximate,
    /// Every byte came from the device
    Physical,
}

impl Accuracy {
    /// One-line explanation for display
    pub fn description(&self) -> &'static str {
        match self {
            Accuracy::Physical => "page cache bypassed",
            Accuracy::Approximate => "cache bypass partially applied, read speed may be optimistic",
            Accuracy::Cached => "page cache not bypassed, read speed reflects cached data",
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Accuracy::Physical => "physical",
            Accuracy::Approximate => "approximate",
            Accuracy::Cached => "cached",
        };
        f.write_str(s)
    }
}

/// The available read strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyKind {
    /// Native unbuffered open
    #[serde(rename = "direct")]
    NoBuffering,
    /// Per-descriptor cache directives plus a system cache purge
    #[serde(rename = "nocache")]
    NoCache,
    /// External `dd` with `iflag=direct`
    #[serde(rename = "dd")]
    DirectCopy,
    /// Plain buffered reads
    #[serde(rename = "buffered")]
    Buffered,
}

impl StrategyKind {
    /// Every strategy, best first
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::NoBuffering,
        StrategyKind::NoCache,
        StrategyKind::DirectCopy,
        StrategyKind::Buffered,
    ];

    /// Name used on the command line and in settings
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::NoBuffering => "direct",
            StrategyKind::NoCache => "nocache",
            StrategyKind::DirectCopy => "dd",
            StrategyKind::Buffered => "buffered",
        }
    }

    /// Short description of the mechanism
    pub fn description(&self) -> &'static str {
        match self {
            StrategyKind::NoBuffering => "Unbuffered reads (O_DIRECT / FILE_FLAG_NO_BUFFERING)",
            StrategyKind::NoCache => "F_NOCACHE and F_RDAHEAD directives with cache purge",
            StrategyKind::DirectCopy => "External dd with iflag=direct",
            StrategyKind::Buffered => "Plain buffered reads (no cache bypass)",
        }
    }

    /// Whether this strategy can run on the current host
    pub fn is_available(&self) -> bool {
        match self {
            StrategyKind::NoBuffering => volspeed_platform::supports(CacheMode::NoBuffering),
            StrategyKind::NoCache => volspeed_platform::supports(CacheMode::NoCache),
            StrategyKind::DirectCopy => {
                cfg!(unix) && DirectCopy::new(DEFAULT_ALIGNMENT).is_available()
            }
            StrategyKind::Buffered => true,
        }
    }

    /// Best strategy the host supports
    pub fn detect() -> Self {
        let kind = StrategyKind::ALL
            .into_iter()
            .find(StrategyKind::is_available)
            .unwrap_or(StrategyKind::Buffered);
        tracing::debug!("Detected read strategy: {}", kind);
        kind
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "direct" | "no-buffering" | "nobuffering" => Ok(StrategyKind::NoBuffering),
            "nocache" | "no-cache" => Ok(StrategyKind::NoCache),
            "dd" | "helper" => Ok(StrategyKind::DirectCopy),
            "buffered" | "standard" => Ok(StrategyKind::Buffered),
            _ => Err(Error::InvalidConfig(format!(
                "Unknown strategy '{}'. Use: auto, direct, nocache, dd, or buffered",
                s
            ))),
        }
    }
}

/// Strategy requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyChoice {
    /// Pick the best available
    #[default]
    Auto,
    /// Use this one
    Fixed(StrategyKind),
}

impl StrategyChoice {
    /// Turn the choice into a concrete kind
    pub fn resolve(self) -> StrategyKind {
        match self {
            StrategyChoice::Auto => StrategyKind::detect(),
            StrategyChoice::Fixed(kind) => kind,
        }
    }
}

impl fmt::Display for StrategyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyChoice::Auto => f.write_str("auto"),
            StrategyChoice::Fixed(kind) => kind.fmt(f),
        }
    }
}

impl FromStr for StrategyChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(StrategyChoice::Auto);
        }
        s.parse().map(StrategyChoice::Fixed)
    }
}

/// What a read strategy measured
#[derive(Debug, Clone, PartialEq)]
pub struct ReadMeasurement {
    /// Bytes read back
    pub bytes_read: u64,
    /// Time spent reading
    pub elapsed: Duration,
    /// How far the cache was kept out
    pub accuracy: Accuracy,
}

/// Per-run view a strategy reads through: sizes, the cancel flag and the
/// progress channel
pub struct ReadContext<'a, 'r> {
    test_size: u64,
    buffer_size: usize,
    cancel: &'a AtomicBool,
    reporter: &'a mut ProgressReporter<'r>,
    bytes_read: u64,
    warnings: Vec<String>,
}

impl<'a, 'r> ReadContext<'a, 'r> {
    pub(crate) fn new(
        test_size: u64,
        buffer_size: usize,
        cancel: &'a AtomicBool,
        reporter: &'a mut ProgressReporter<'r>,
    ) -> Self {
        Self {
            test_size,
            buffer_size,
            cancel,
            reporter,
            bytes_read: 0,
            warnings: Vec::new(),
        }
    }

    /// Size of the file being read
    pub fn test_size(&self) -> u64 {
        self.test_size
    }

    /// Transfer size per chunk
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The run's cancel flag
    pub fn cancel_flag(&self) -> &AtomicBool {
        self.cancel
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Bytes reported so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Record that `total` bytes have been read and emit progress
    pub fn report_read(&mut self, total: u64) {
        self.bytes_read = total;
        let percent = read_percent(total, self.test_size);
        self.reporter.info(
            Phase::Reading,
            format!("Reading... {}%", read_phase_percent(percent)),
            percent,
        );
    }

    /// Emit a status message without advancing the percent
    pub fn notify(&mut self, message: impl Into<String>) {
        let percent = self.reporter.last_percent();
        self.reporter.info(Phase::Reading, message, percent);
    }

    /// Emit a cache-bypass warning and keep it for the result
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.reporter.warn(Phase::Reading, message.clone());
        self.warnings.push(message);
    }

    pub(crate) fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}

/// A way of reading the test file back with the page cache kept out
pub trait ReadStrategy: Send + Sync {
    /// Which strategy this is
    fn kind(&self) -> StrategyKind;

    /// Best accuracy this strategy can reach
    fn accuracy(&self) -> Accuracy;

    /// Evict the freshly written file from caches before the read phase.
    ///
    /// Returns the cache-bypass problems met on the way; none of them are
    /// fatal.
    fn prepare(&self, path: &Path) -> Vec<String>;

    /// Read the whole file, reporting progress through `ctx` and stopping
    /// with [`Error::Cancelled`] when its cancel flag is raised
    fn read(&self, path: &Path, ctx: &mut ReadContext<'_, '_>) -> Result<ReadMeasurement>;
}

/// Read `file` to EOF in buffer-sized chunks, checking for cancellation
/// before each chunk
fn read_chunked(
    file: &mut dyn UncachedFile,
    buffer: &mut [u8],
    ctx: &mut ReadContext<'_, '_>,
) -> Result<(u64, Duration)> {
    let start = Instant::now();
    let mut total: u64 = 0;

    loop {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let n = file.read_chunk(buffer)?;
        if n == 0 {
            break;
        }

        total += n as u64;
        ctx.report_read(total);
    }

    Ok((total, start.elapsed()))
}

fn aligned_buffer(ctx: &ReadContext<'_, '_>) -> Result<AlignedBuffer> {
    Ok(AlignedBuffer::new(ctx.buffer_size(), DEFAULT_ALIGNMENT)?)
}

// ============================================================================
// Native unbuffered reads
// ============================================================================

/// Opens the file with the platform's unbuffered mode. Falls back to
/// evict-then-read when the filesystem refuses it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBufferingRead;

impl NoBufferingRead {
    fn fallback(
        &self,
        path: &Path,
        buffer: &mut AlignedBuffer,
        ctx: &mut ReadContext<'_, '_>,
        reason: String,
    ) -> Result<ReadMeasurement> {
        ctx.warn(format!(
            "Unbuffered reads refused ({}); falling back to buffered reads",
            reason
        ));

        let accuracy = match volspeed_platform::drop_file_cache(path) {
            Ok(()) => Accuracy::Approximate,
            Err(e) => {
                ctx.warn(format!("Could not evict test file from cache: {}", e));
                Accuracy::Cached
            }
        };

        let mut file = volspeed_platform::open_uncached(path, CacheMode::Buffered, 1)?;
        let (bytes_read, elapsed) = read_chunked(file.as_mut(), buffer.as_mut_slice(), ctx)?;

        Ok(ReadMeasurement {
            bytes_read,
            elapsed,
            accuracy,
        })
    }
}

impl ReadStrategy for NoBufferingRead {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NoBuffering
    }

    fn accuracy(&self) -> Accuracy {
        Accuracy::Physical
    }

    fn prepare(&self, path: &Path) -> Vec<String> {
        // The handle bypasses the cache; eviction only matters for the fallback
        if let Err(e) = volspeed_platform::drop_file_cache(path) {
            tracing::debug!("Per-file eviction skipped: {}", e);
        }
        Vec::new()
    }

    fn read(&self, path: &Path, ctx: &mut ReadContext<'_, '_>) -> Result<ReadMeasurement> {
        let mut buffer = aligned_buffer(ctx)?;

        let reason =
            match volspeed_platform::open_uncached(path, CacheMode::NoBuffering, DEFAULT_ALIGNMENT)
            {
                Ok(mut file) => match read_chunked(file.as_mut(), buffer.as_mut_slice(), ctx) {
                    Ok((bytes_read, elapsed)) => {
                        return Ok(ReadMeasurement {
                            bytes_read,
                            elapsed,
                            accuracy: Accuracy::Physical,
                        })
                    }
                    Err(Error::CacheBypassUnavailable(reason)) if ctx.bytes_read() == 0 => reason,
                    Err(e) => return Err(e),
                },
                Err(PlatformError::DirectIoUnsupported(reason)) => reason,
                Err(e) => return Err(e.into()),
            };

        self.fallback(path, &mut buffer, ctx, reason)
    }
}

// ============================================================================
// Cache directives plus purge
// ============================================================================

/// Purges the system cache, then reads through a descriptor flagged not to
/// cache or read ahead
#[derive(Debug, Clone, Copy)]
pub struct NoCacheRead {
    purge: bool,
}

impl NoCacheRead {
    /// `purge` controls whether the system-wide purge command is run
    pub fn new(purge: bool) -> Self {
        Self { purge }
    }
}

impl Default for NoCacheRead {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ReadStrategy for NoCacheRead {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NoCache
    }

    fn accuracy(&self) -> Accuracy {
        Accuracy::Physical
    }

    fn prepare(&self, path: &Path) -> Vec<String> {
        match volspeed_platform::drop_file_cache(path) {
            Ok(()) => return Vec::new(),
            Err(e) => tracing::debug!("Per-file eviction unavailable: {}", e),
        }

        if !self.purge {
            return vec![
                "System cache purge disabled; read speed may include cached data".to_string(),
            ];
        }

        match volspeed_platform::purge_system_cache() {
            Ok(()) => {
                tracing::debug!("System cache purged");
                Vec::new()
            }
            Err(e) => vec![format!(
                "System cache purge failed ({}); read speed is approximate",
                e
            )],
        }
    }

    fn read(&self, path: &Path, ctx: &mut ReadContext<'_, '_>) -> Result<ReadMeasurement> {
        let mut buffer = aligned_buffer(ctx)?;
        let mut file = volspeed_platform::open_uncached(path, CacheMode::NoCache, 1)?;

        let accuracy = match file.info().degraded.clone() {
            Some(reason) => {
                ctx.warn(reason);
                Accuracy::Approximate
            }
            None => Accuracy::Physical,
        };

        let (bytes_read, elapsed) = read_chunked(file.as_mut(), buffer.as_mut_slice(), ctx)?;

        Ok(ReadMeasurement {
            bytes_read,
            elapsed,
            accuracy,
        })
    }
}

// ============================================================================
// External dd helper
// ============================================================================

/// Streams the file through `dd iflag=direct` and times the process.
///
/// No live progress: one event when the helper starts, one when it ends.
#[derive(Debug, Clone)]
pub struct DirectCopyRead {
    timeout: Duration,
    command: Option<(OsString, Vec<OsString>)>,
}

impl DirectCopyRead {
    /// Helper bounded by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            command: None,
        }
    }

    /// Run a different program in place of `dd`, with `base_args` before
    /// the dd operands
    pub fn with_command<I, S>(mut self, program: impl Into<OsString>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.command = Some((
            program.into(),
            base_args.into_iter().map(Into::into).collect(),
        ));
        self
    }

    fn helper(&self, block_size: usize) -> DirectCopy {
        let copy = DirectCopy::new(block_size).timeout(self.timeout);
        match &self.command {
            Some((program, args)) => copy.with_command(program.clone(), args.clone()),
            None => copy,
        }
    }
}

impl Default for DirectCopyRead {
    fn default() -> Self {
        Self::new(DEFAULT_HELPER_TIMEOUT)
    }
}

impl ReadStrategy for DirectCopyRead {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectCopy
    }

    fn accuracy(&self) -> Accuracy {
        Accuracy::Physical
    }

    fn prepare(&self, path: &Path) -> Vec<String> {
        if let Err(e) = volspeed_platform::drop_file_cache(path) {
            tracing::debug!("Per-file eviction skipped: {}", e);
        }
        Vec::new()
    }

    fn read(&self, path: &Path, ctx: &mut ReadContext<'_, '_>) -> Result<ReadMeasurement> {
        let expected = std::fs::metadata(path)
            .map_err(|e| Error::io(Phase::Reading, e))?
            .len();

        let copy = self.helper(ctx.buffer_size());
        ctx.notify("Reading via dd (no live progress)...");

        let stats = copy.run(path, ctx.cancel_flag())?;
        let bytes_read = stats.bytes.unwrap_or_else(|| {
            tracing::debug!("dd reported no byte count, using file length");
            expected
        });
        ctx.report_read(bytes_read);

        Ok(ReadMeasurement {
            bytes_read,
            elapsed: stats.elapsed,
            accuracy: Accuracy::Physical,
        })
    }
}

// ============================================================================
// Plain buffered reads
// ============================================================================

/// Ordinary chunked reads. Last resort: the number reflects the page cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedRead;

impl ReadStrategy for BufferedRead {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Buffered
    }

    fn accuracy(&self) -> Accuracy {
        Accuracy::Cached
    }

    fn prepare(&self, _path: &Path) -> Vec<String> {
        vec!["No cache bypass in use; read speed reflects the page cache".to_string()]
    }

    fn read(&self, path: &Path, ctx: &mut ReadContext<'_, '_>) -> Result<ReadMeasurement> {
        let mut buffer = aligned_buffer(ctx)?;
        let mut file = volspeed_platform::open_uncached(path, CacheMode::Buffered, 1)?;
        let (bytes_read, elapsed) = read_chunked(file.as_mut(), buffer.as_mut_slice(), ctx)?;

        Ok(ReadMeasurement {
            bytes_read,
            elapsed,
            accuracy: Accuracy::Cached,
        })
    }
}

/// Build the strategy for `kind`
pub fn build_strategy(
    kind: StrategyKind,
    purge_cache: bool,
    helper_timeout: Duration,
) -> Box<dyn ReadStrategy> {
    match kind {
        StrategyKind::NoBuffering => Box::new(NoBufferingRead),
        StrategyKind::NoCache => Box::new(NoCacheRead::new(purge_cache)),
        StrategyKind::DirectCopy => Box::new(DirectCopyRead::new(helper_timeout)),
        StrategyKind::Buffered => Box::new(BufferedRead),
    }
}
