//! Speed-test orchestration
//!
//! A run writes `test_size` bytes of random data to a fresh temporary file,
//! syncs it, evicts it from the caches, and reads it back through the
//! engine's [`ReadStrategy`]. Both phases are timed; the temporary file is
//! removed on every exit path before the terminal event is delivered.
//!
//! Runs either synchronously with [`SpeedTestEngine::run`] or on a worker
//! thread with [`SpeedTestEngine::start`], which hands back a
//! [`SpeedTestHandle`] to receive events from and cancel through.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::outcome::{TestEvent, TestOutcome, TestResult};
use crate::progress::{
    write_percent, write_phase_percent, Phase, ProgressEvent, ProgressReporter,
};
use crate::request::TestRequest;
use crate::state::{SharedState, TestState};
use crate::strategy::{
    build_strategy, Accuracy, ReadContext, ReadStrategy, StrategyChoice, StrategyKind,
};
use crate::temp::TempFileGuard;
use crate::units::{format_size, mib_per_sec};
use rand::RngCore;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Measures sequential write and uncached read bandwidth of a directory's
/// filesystem
pub struct SpeedTestEngine {
    config: EngineConfig,
    strategy: Arc<dyn ReadStrategy>,
}

impl SpeedTestEngine {
    /// Engine with the default configuration and the best strategy the
    /// host supports
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let strategy = build_strategy(
            StrategyKind::detect(),
            config.purge_cache,
            config.helper_timeout,
        );
        Self {
            config,
            strategy: Arc::from(strategy),
        }
    }

    /// Engine with a custom configuration. Fails if an explicitly requested
    /// strategy cannot run here.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        if let StrategyChoice::Fixed(kind) = config.strategy {
            if !kind.is_available() {
                return Err(Error::InvalidConfig(format!(
                    "Strategy '{}' is not available on this system",
                    kind
                )));
            }
        }

        let kind = config.strategy.resolve();
        tracing::debug!("Using read strategy {} ({})", kind, kind.description());
        let strategy = build_strategy(kind, config.purge_cache, config.helper_timeout);

        Ok(Self {
            config,
            strategy: Arc::from(strategy),
        })
    }

    /// Engine reading through a caller-supplied strategy
    pub fn with_strategy(strategy: impl ReadStrategy + 'static) -> Self {
        Self {
            config: EngineConfig::default().strategy(StrategyChoice::Fixed(strategy.kind())),
            strategy: Arc::new(strategy),
        }
    }

    /// Get the current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Strategy the read phase uses
    pub fn strategy(&self) -> &dyn ReadStrategy {
        self.strategy.as_ref()
    }

    /// Run a test on the calling thread.
    ///
    /// `on_progress` sees every progress event; raising `cancel` stops the
    /// run at the next chunk boundary with [`Error::Cancelled`].
    pub fn run<F>(
        &self,
        request: &TestRequest,
        cancel: &AtomicBool,
        mut on_progress: F,
    ) -> Result<TestResult>
    where
        F: FnMut(&ProgressEvent),
    {
        let state = SharedState::default();
        let mut sink = |event: ProgressEvent| on_progress(&event);
        let result = execute(request, self.strategy.as_ref(), cancel, &state, &mut sink);
        conclude(&state, result).into_result()
    }

    /// Run a test on a worker thread
    pub fn start(&self, request: TestRequest) -> Result<SpeedTestHandle> {
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let state = SharedState::default();

        let worker = {
            let cancel = Arc::clone(&cancel);
            let state = state.clone();
            let strategy = Arc::clone(&self.strategy);

            std::thread::Builder::new()
                .name("volspeed-test".to_string())
                .spawn(move || {
                    let mut sink = |event: ProgressEvent| {
                        let _ = tx.send(TestEvent::Progress(event));
                    };
                    let result = execute(&request, strategy.as_ref(), &cancel, &state, &mut sink);
                    let outcome = conclude(&state, result);
                    let _ = tx.send(TestEvent::Finished(outcome));
                })
                .map_err(|e| Error::Worker(format!("cannot spawn thread: {}", e)))?
        };

        Ok(SpeedTestHandle {
            events: rx,
            cancel,
            state,
            worker: Some(worker),
            finished: false,
        })
    }
}

impl Default for SpeedTestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A run in progress on a worker thread.
///
/// Iterating yields its events up to and including the terminal
/// [`TestEvent::Finished`]. Dropping an unfinished handle cancels the run
/// and waits for the worker to clean up.
pub struct SpeedTestHandle {
    events: Receiver<TestEvent>,
    cancel: Arc<AtomicBool>,
    state: SharedState,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl SpeedTestHandle {
    /// Request cancellation. Takes effect at the next chunk boundary; a
    /// running helper process is killed.
    pub fn cancel(&self) {
        tracing::debug!("Cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Get a handle to cancel the run from elsewhere
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Current lifecycle state
    pub fn state(&self) -> TestState {
        self.state.get()
    }

    /// Whether the terminal event has been received
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Block for the next event. `None` once the terminal event has been
    /// delivered.
    pub fn recv(&mut self) -> Option<TestEvent> {
        if self.finished {
            return None;
        }

        match self.events.recv() {
            Ok(event) => {
                if matches!(event, TestEvent::Finished(_)) {
                    self.finished = true;
                    self.join();
                }
                Some(event)
            }
            Err(_) => {
                self.finished = true;
                self.join();
                None
            }
        }
    }

    /// Drain the stream and return the outcome
    pub fn wait(mut self) -> TestOutcome {
        while let Some(event) = self.recv() {
            if let TestEvent::Finished(outcome) = event {
                return outcome;
            }
        }
        TestOutcome::Failed(Error::Worker(
            "worker exited without a result".to_string(),
        ))
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Speed-test worker panicked");
            }
        }
    }
}

impl Iterator for SpeedTestHandle {
    type Item = TestEvent;

    fn next(&mut self) -> Option<TestEvent> {
        self.recv()
    }
}

impl Drop for SpeedTestHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
        self.join();
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Record the terminal state and turn the result into an outcome
fn conclude(state: &SharedState, result: Result<TestResult>) -> TestOutcome {
    match result {
        Ok(result) => TestOutcome::Completed(result),
        Err(Error::Cancelled) => {
            state.advance(TestState::Cancelled);
            tracing::info!("Speed test cancelled");
            TestOutcome::Cancelled
        }
        Err(err) => {
            state.advance(TestState::Failed);
            tracing::warn!("Speed test failed: {}", err);
            TestOutcome::Failed(err)
        }
    }
}

fn execute(
    request: &TestRequest,
    strategy: &dyn ReadStrategy,
    cancel: &AtomicBool,
    state: &SharedState,
    sink: &mut dyn FnMut(ProgressEvent),
) -> Result<TestResult> {
    request.validate()?;

    let test_size = request.test_size();
    let buffer_size = request.get_buffer_size();
    tracing::info!(
        "Testing {} in {} ({} buffer, {} reads)",
        format_size(test_size),
        request.target_directory().display(),
        format_size(buffer_size as u64),
        strategy.kind()
    );

    let mut reporter = ProgressReporter::new(sink);
    let (guard, file) = TempFileGuard::create(request.target_directory())?;

    state.advance(TestState::Writing);
    reporter.info(
        Phase::Writing,
        format!("Preparing write test ({})...", format_size(test_size)),
        0,
    );
    let write_elapsed = write_phase(file, test_size, buffer_size, cancel, &mut reporter)?;
    tracing::debug!("Write phase finished in {:?}", write_elapsed);
    check_cancelled(cancel)?;

    state.advance(TestState::ClearingCache);
    reporter.info(Phase::ClearingCache, "Clearing cache...", 50);
    let mut warnings = Vec::new();
    for warning in strategy.prepare(guard.path()) {
        tracing::warn!("{}", warning);
        reporter.warn(Phase::ClearingCache, warning.clone());
        warnings.push(warning);
    }
    check_cancelled(cancel)?;

    state.advance(TestState::Reading);
    reporter.info(Phase::Reading, "Preparing read test...", 50);
    let mut ctx = ReadContext::new(test_size, buffer_size, cancel, &mut reporter);
    let measurement = strategy.read(guard.path(), &mut ctx)?;
    warnings.extend(ctx.into_warnings());
    tracing::debug!("Read phase finished in {:?}", measurement.elapsed);

    if measurement.bytes_read != test_size {
        return Err(Error::SizeMismatch {
            written: test_size,
            read: measurement.bytes_read,
        });
    }

    let accuracy = if warnings.is_empty() {
        measurement.accuracy
    } else {
        measurement.accuracy.min(Accuracy::Approximate)
    };

    let result = TestResult {
        write_speed_mbps: mib_per_sec(test_size, write_elapsed),
        read_speed_mbps: mib_per_sec(measurement.bytes_read, measurement.elapsed),
        bytes_written: test_size,
        bytes_read: measurement.bytes_read,
        write_elapsed,
        read_elapsed: measurement.elapsed,
        buffer_size,
        strategy: strategy.kind(),
        accuracy,
        warnings,
    };

    drop(guard);

    state.advance(TestState::Done);
    reporter.info(Phase::Done, result.summary(), 100);
    tracing::info!("{} ({} reads, {})", result.summary(), result.strategy, result.accuracy);

    Ok(result)
}

/// Write `test_size` bytes of random data and sync. The returned duration
/// includes the sync.
fn write_phase(
    mut file: File,
    test_size: u64,
    buffer_size: usize,
    cancel: &AtomicBool,
    reporter: &mut ProgressReporter<'_>,
) -> Result<Duration> {
    let mut buffer = vec![0u8; buffer_size];
    rand::rng().fill_bytes(&mut buffer);

    let start = Instant::now();
    let mut written: u64 = 0;

    while written < test_size {
        check_cancelled(cancel)?;

        let chunk = (test_size - written).min(buffer.len() as u64) as usize;
        file.write_all(&buffer[..chunk])
            .map_err(|e| Error::io(Phase::Writing, e))?;
        written += chunk as u64;

        let percent = write_percent(written, test_size);
        reporter.info(
            Phase::Writing,
            format!("Writing... {}%", write_phase_percent(percent)),
            percent,
        );
    }

    file.sync_all().map_err(|e| Error::io(Phase::Writing, e))?;
    Ok(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{BufferedRead, ReadMeasurement};
    use std::path::Path;
    use tempfile::TempDir;

    /// Reads nothing and fails with an IO error
    struct FailingRead;

    impl ReadStrategy for FailingRead {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Buffered
        }

        fn accuracy(&self) -> Accuracy {
            Accuracy::Cached
        }

        fn prepare(&self, _path: &Path) -> Vec<String> {
            Vec::new()
        }

        fn read(&self, path: &Path, _ctx: &mut ReadContext<'_, '_>) -> Result<ReadMeasurement> {
            assert!(path.exists());
            Err(Error::io(Phase::Reading, std::io::Error::other("media error")))
        }
    }

    /// Reports half the file
    struct ShortRead;

    impl ReadStrategy for ShortRead {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Buffered
        }

        fn accuracy(&self) -> Accuracy {
            Accuracy::Cached
        }

        fn prepare(&self, _path: &Path) -> Vec<String> {
            Vec::new()
        }

        fn read(&self, _path: &Path, ctx: &mut ReadContext<'_, '_>) -> Result<ReadMeasurement> {
            Ok(ReadMeasurement {
                bytes_read: ctx.test_size() / 2,
                elapsed: Duration::from_millis(5),
                accuracy: Accuracy::Cached,
            })
        }
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_run_buffered() {
        let dir = TempDir::new().unwrap();
        let engine = SpeedTestEngine::with_strategy(BufferedRead);
        let request = TestRequest::new(dir.path(), 16 * 4096).buffer_size(4096);
        let cancel = AtomicBool::new(false);

        let mut events = Vec::new();
        let result = engine
            .run(&request, &cancel, |e| events.push(e.clone()))
            .unwrap();

        assert_eq!(result.bytes_written, 16 * 4096);
        assert_eq!(result.bytes_read, 16 * 4096);
        assert!(result.write_speed_mbps > 0.0);
        assert!(result.read_speed_mbps > 0.0);
        assert_eq!(result.strategy, StrategyKind::Buffered);
        assert_eq!(result.accuracy, Accuracy::Cached);
        assert_eq!(result.warnings.len(), 1);

        let last = events.last().unwrap();
        assert_eq!(last.phase, Phase::Done);
        assert_eq!(last.percent, 100);
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[test]
    fn test_write_progress_text() {
        let dir = TempDir::new().unwrap();
        let engine = SpeedTestEngine::with_strategy(BufferedRead);
        let request = TestRequest::new(dir.path(), 4 * 4096).buffer_size(4096);
        let cancel = AtomicBool::new(false);

        let mut events = Vec::new();
        engine
            .run(&request, &cancel, |e| events.push(e.clone()))
            .unwrap();

        let writes: Vec<(u8, String)> = events
            .iter()
            .filter(|e| e.phase == Phase::Writing)
            .map(|e| (e.percent, e.message.clone()))
            .collect();
        assert_eq!(writes[0].0, 0);
        assert!(writes[0].1.starts_with("Preparing write test"));
        assert_eq!(
            writes[1..].to_vec(),
            vec![
                (12, "Writing... 24%".to_string()),
                (25, "Writing... 50%".to_string()),
                (37, "Writing... 74%".to_string()),
                (50, "Writing... 100%".to_string()),
            ]
        );
    }

    #[test]
    fn test_read_failure_cleans_up() {
        let dir = TempDir::new().unwrap();
        let engine = SpeedTestEngine::with_strategy(FailingRead);
        let request = TestRequest::new(dir.path(), 8192).buffer_size(4096);
        let cancel = AtomicBool::new(false);

        let result = engine.run(&request, &cancel, |_| {});
        match result {
            Err(Error::Io { phase, source }) => {
                assert_eq!(phase, Phase::Reading);
                assert!(source.to_string().contains("media error"));
            }
            other => panic!("expected read error, got {other:?}"),
        }
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[test]
    fn test_short_read_is_error() {
        let dir = TempDir::new().unwrap();
        let engine = SpeedTestEngine::with_strategy(ShortRead);
        let request = TestRequest::new(dir.path(), 8192).buffer_size(4096);
        let cancel = AtomicBool::new(false);

        let result = engine.run(&request, &cancel, |_| {});
        assert!(matches!(
            result,
            Err(Error::SizeMismatch {
                written: 8192,
                read: 4096
            })
        ));
    }

    #[test]
    fn test_cancel_before_start() {
        let dir = TempDir::new().unwrap();
        let engine = SpeedTestEngine::with_strategy(BufferedRead);
        let request = TestRequest::new(dir.path(), 8192).buffer_size(4096);
        let cancel = AtomicBool::new(true);

        let mut count = 0;
        let result = engine.run(&request, &cancel, |_| count += 1);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(count <= 1);
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[test]
    fn test_invalid_request_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = SpeedTestEngine::with_strategy(BufferedRead);
        let request = TestRequest::new(dir.path(), 0);
        let cancel = AtomicBool::new(false);

        let mut count = 0;
        let result = engine.run(&request, &cancel, |_| count += 1);
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(count, 0);
    }

    #[test]
    fn test_start_delivers_single_terminal_event() {
        let dir = TempDir::new().unwrap();
        let engine = SpeedTestEngine::with_strategy(BufferedRead);
        let request = TestRequest::new(dir.path(), 8 * 4096).buffer_size(4096);

        let mut handle = engine.start(request).unwrap();
        let events: Vec<TestEvent> = handle.by_ref().collect();

        let finished = events
            .iter()
            .filter(|e| matches!(e, TestEvent::Finished(_)))
            .count();
        assert_eq!(finished, 1);
        assert!(matches!(
            events.last(),
            Some(TestEvent::Finished(TestOutcome::Completed(_)))
        ));
        assert_eq!(handle.state(), TestState::Done);
        assert!(handle.is_finished());
        assert!(handle.recv().is_none());
    }

    #[test]
    fn test_with_config_rejects_unavailable_strategy() {
        let unavailable = StrategyKind::ALL.into_iter().find(|k| !k.is_available());
        if let Some(kind) = unavailable {
            let config = EngineConfig::new().strategy(StrategyChoice::Fixed(kind));
            assert!(matches!(
                SpeedTestEngine::with_config(config),
                Err(Error::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_with_config_buffered() {
        let config = EngineConfig::new().strategy(StrategyChoice::Fixed(StrategyKind::Buffered));
        let engine = SpeedTestEngine::with_config(config).unwrap();
        assert_eq!(engine.strategy().kind(), StrategyKind::Buffered);
    }
}
