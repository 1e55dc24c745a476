//! Integration tests for volspeed-core
//!
//! These drive complete runs against temporary directories through the
//! public API, both synchronously and through the worker handle.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use volspeed_core::*;

const KIB: u64 = 1024;

fn leftover_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect()
}

fn collect(handle: SpeedTestHandle) -> (Vec<ProgressEvent>, TestOutcome) {
    let mut progress = Vec::new();
    let mut outcome = None;
    for event in handle {
        match event {
            TestEvent::Progress(p) => {
                assert!(outcome.is_none(), "progress after terminal event");
                progress.push(p);
            }
            TestEvent::Finished(o) => {
                assert!(outcome.is_none(), "second terminal event");
                outcome = Some(o);
            }
        }
    }
    (progress, outcome.expect("no terminal event"))
}

// ============================================================================
// Complete runs
// ============================================================================

#[test]
fn test_full_run_buffered_percent_sequence() {
    // 25 chunks, scaled down from 100 MiB in 4 MiB chunks
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 100 * 64 * KIB).buffer_size(4 * 64 * 1024);

    let (events, outcome) = collect(engine.start(request).unwrap());
    let result = match outcome {
        TestOutcome::Completed(result) => result,
        other => panic!("expected completion, got {other:?}"),
    };

    let writes: Vec<u8> = events
        .iter()
        .filter(|e| e.phase == Phase::Writing && e.message.starts_with("Writing"))
        .map(|e| e.percent)
        .collect();
    let expected_writes: Vec<u8> = (1..=25).map(|i| i * 2).collect();
    assert_eq!(writes, expected_writes);

    let reads: Vec<u8> = events
        .iter()
        .filter(|e| e.phase == Phase::Reading && e.message.starts_with("Reading..."))
        .map(|e| e.percent)
        .collect();
    let expected_reads: Vec<u8> = (1..=25).map(|i| 50 + i * 2).collect();
    assert_eq!(reads, expected_reads);

    assert!(result.write_speed_mbps > 0.0);
    assert!(result.read_speed_mbps > 0.0);
    assert_eq!(result.bytes_read, result.bytes_written);
    assert!(leftover_files(dir.path()).is_empty());
}

#[test]
fn test_progress_is_monotonic_and_ends_at_100() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 256 * KIB).buffer_size(16 * 1024);

    let (events, outcome) = collect(engine.start(request).unwrap());
    assert!(matches!(outcome, TestOutcome::Completed(_)));

    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert_eq!(events.first().unwrap().percent, 0);
    let last = events.last().unwrap();
    assert_eq!(last.phase, Phase::Done);
    assert_eq!(last.percent, 100);
    assert!(last.message.starts_with("Write: "));
}

#[test]
fn test_phase_order() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 64 * KIB).buffer_size(16 * 1024);

    let (events, _) = collect(engine.start(request).unwrap());
    let mut phases: Vec<Phase> = events.iter().map(|e| e.phase).collect();
    phases.dedup();
    assert_eq!(
        phases,
        vec![Phase::Writing, Phase::ClearingCache, Phase::Reading, Phase::Done]
    );

    let clearing = events
        .iter()
        .find(|e| e.phase == Phase::ClearingCache)
        .unwrap();
    assert_eq!(clearing.percent, 50);
}

#[test]
fn test_read_text_starts_from_zero_with_small_chunks() {
    // Each chunk is well under 2% of the file
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 1024 * KIB).buffer_size(4096);
    let cancel = AtomicBool::new(false);

    let mut reads = Vec::new();
    engine
        .run(&request, &cancel, |e| {
            if e.message.starts_with("Reading...") {
                reads.push((e.percent, e.message.clone()));
            }
        })
        .unwrap();

    assert_eq!(reads[0], (50, "Reading... 0%".to_string()));
    assert_eq!(reads.last().unwrap(), &(100, "Reading... 100%".to_string()));
    for (percent, message) in &reads {
        assert_eq!(message, &format!("Reading... {}%", (percent - 50) * 2));
    }
}

#[test]
fn test_size_smaller_than_buffer() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 1000).buffer_size(64 * 1024);

    let (events, outcome) = collect(engine.start(request).unwrap());
    let result = outcome.into_result().unwrap();
    assert_eq!(result.bytes_written, 1000);
    assert_eq!(result.bytes_read, 1000);

    let writes: Vec<u8> = events
        .iter()
        .filter(|e| e.message.starts_with("Writing..."))
        .map(|e| e.percent)
        .collect();
    assert_eq!(writes, vec![50]);
}

#[test]
fn test_auto_engine_completes() {
    // Whatever the host selects must measure the full file
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::new();
    let request = TestRequest::new(dir.path(), 128 * KIB).buffer_size(64 * 1024);

    let outcome = engine.start(request).unwrap().wait();
    let result = outcome.into_result().unwrap();
    assert_eq!(result.bytes_read, 128 * KIB);
    assert_eq!(result.strategy, engine.strategy().kind());
    assert!(result.accuracy <= engine.strategy().accuracy());
    assert!(leftover_files(dir.path()).is_empty());
}

#[test]
fn test_synchronous_run() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 32 * KIB).buffer_size(4096);
    let cancel = AtomicBool::new(false);

    let mut seen = 0;
    let result = engine.run(&request, &cancel, |_| seen += 1).unwrap();
    assert_eq!(result.bytes_written, 32 * KIB);
    assert!(seen > 8);
}

// ============================================================================
// Failures and cancellation
// ============================================================================

#[test]
fn test_missing_directory_is_creation_error() {
    // A volume unmounted between request and run
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("unmounted");
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(&missing, 64 * KIB);

    let (events, outcome) = collect(engine.start(request).unwrap());
    assert!(events.is_empty());
    match outcome {
        TestOutcome::Failed(Error::Creation { path, .. }) => assert!(path.starts_with(&missing)),
        other => panic!("expected creation error, got {other:?}"),
    }
    assert!(!missing.exists());
}

#[cfg(unix)]
#[test]
fn test_unwritable_directory_is_creation_error() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let locked = dir.path().join("locked");
    std::fs::create_dir(&locked).unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

    // root ignores directory permissions
    if std::fs::File::create(locked.join("probe")).is_ok() {
        return;
    }

    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(&locked, 64 * KIB).buffer_size(4096);
    let (events, outcome) = collect(engine.start(request).unwrap());

    assert!(matches!(outcome, TestOutcome::Failed(Error::Creation { .. })));
    assert!(events.iter().all(|e| e.phase != Phase::Reading));
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn test_cancel_immediately() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 1024 * 1024 * KIB).buffer_size(4096);

    let handle = engine.start(request).unwrap();
    handle.cancel();
    let state_handle = handle.cancel_handle();
    let (events, outcome) = collect(handle);

    assert!(state_handle.load(std::sync::atomic::Ordering::SeqCst));
    assert!(matches!(outcome, TestOutcome::Cancelled));
    assert!(events.iter().all(|e| e.phase == Phase::Writing));
    assert!(leftover_files(dir.path()).is_empty());
}

#[test]
fn test_cancel_during_read_removes_file() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 256 * KIB).buffer_size(4096);
    let cancel = AtomicBool::new(false);

    let mut reads_after_cancel = 0;
    let result = engine.run(&request, &cancel, |e| {
        if e.phase == Phase::Reading && e.message.starts_with("Reading...") {
            if cancel.load(Ordering::SeqCst) {
                reads_after_cancel += 1;
            }
            cancel.store(true, Ordering::SeqCst);
        }
    });

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(reads_after_cancel <= 1);
    assert!(leftover_files(dir.path()).is_empty());
}

/// Buffered reads that hold off until the caller has cancelled
struct ReadAfterCancel;

impl ReadStrategy for ReadAfterCancel {
    fn kind(&self) -> StrategyKind {
        BufferedRead.kind()
    }

    fn accuracy(&self) -> Accuracy {
        BufferedRead.accuracy()
    }

    fn prepare(&self, path: &Path) -> Vec<String> {
        BufferedRead.prepare(path)
    }

    fn read(&self, path: &Path, ctx: &mut ReadContext<'_, '_>) -> Result<ReadMeasurement> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !ctx.is_cancelled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        BufferedRead.read(path, ctx)
    }
}

#[test]
fn test_handle_cancel_during_read() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(ReadAfterCancel);
    let request = TestRequest::new(dir.path(), 64 * KIB).buffer_size(4096);

    let mut handle = engine.start(request).unwrap();
    let mut outcome = None;
    while let Some(event) = handle.recv() {
        match event {
            TestEvent::Progress(p) if p.phase == Phase::Reading => handle.cancel(),
            TestEvent::Progress(_) => {}
            TestEvent::Finished(o) => outcome = Some(o),
        }
    }

    assert!(matches!(outcome, Some(TestOutcome::Cancelled)));
    assert_eq!(handle.state(), TestState::Cancelled);
    assert!(leftover_files(dir.path()).is_empty());
}

#[test]
fn test_cancel_before_any_work_emits_at_most_one_event() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 64 * KIB).buffer_size(4096);
    let cancel = AtomicBool::new(true);

    let mut count = 0;
    let result = engine.run(&request, &cancel, |_| count += 1);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(count <= 1);
    assert!(leftover_files(dir.path()).is_empty());
}

#[test]
fn test_state_after_cancel() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 1024 * 1024 * KIB).buffer_size(4096);

    let mut handle = engine.start(request).unwrap();
    handle.cancel();
    while handle.recv().is_some() {}
    assert_eq!(handle.state(), TestState::Cancelled);
}

#[test]
fn test_dropping_handle_cancels_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 1024 * 1024 * KIB).buffer_size(4096);

    let mut handle = engine.start(request).unwrap();
    // Wait for the write phase to start
    let _ = handle.recv();
    drop(handle);

    assert!(leftover_files(dir.path()).is_empty());
}

#[cfg(unix)]
#[test]
fn test_helper_timeout_is_distinct_failure() {
    let dir = TempDir::new().unwrap();
    let strategy = DirectCopyRead::new(Duration::from_millis(200))
        .with_command("sh", ["-c", "sleep 5", "dd"]);
    let engine = SpeedTestEngine::with_strategy(strategy);
    let request = TestRequest::new(dir.path(), 16 * KIB).buffer_size(4096);

    let outcome = engine.start(request).unwrap().wait();
    match outcome {
        TestOutcome::Failed(Error::SubprocessTimeout { timeout, .. }) => {
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(leftover_files(dir.path()).is_empty());
}

#[cfg(unix)]
#[test]
fn test_helper_read_through_engine() {
    let dir = TempDir::new().unwrap();
    let strategy = DirectCopyRead::default().with_command(
        "sh",
        ["-c", "echo \"$(wc -c < \"${1#if=}\") bytes copied\" >&2", "dd"],
    );
    let engine = SpeedTestEngine::with_strategy(strategy);
    let request = TestRequest::new(dir.path(), 48 * KIB).buffer_size(16 * 1024);

    let (events, outcome) = collect(engine.start(request).unwrap());
    let result = outcome.into_result().unwrap();
    assert_eq!(result.bytes_read, 48 * KIB);
    assert_eq!(result.strategy, StrategyKind::DirectCopy);

    // dd gives no live progress: a single jump to 100
    let reads: Vec<u8> = events
        .iter()
        .filter(|e| e.message.starts_with("Reading..."))
        .map(|e| e.percent)
        .collect();
    assert_eq!(reads, vec![100]);
}

// ============================================================================
// Settings to engine
// ============================================================================

#[test]
fn test_settings_drive_a_run() {
    let dir = TempDir::new().unwrap();
    let speedtest = SpeedTestSettings {
        test_size: "64K".to_string(),
        buffer_size: "16K".to_string(),
        strategy: "buffered".to_string(),
        ..Default::default()
    };

    let engine = SpeedTestEngine::with_config(speedtest.engine_config().unwrap()).unwrap();
    let request = speedtest.request(dir.path()).unwrap();
    let result = engine.start(request).unwrap().wait().into_result().unwrap();

    assert_eq!(result.bytes_written, 64 * KIB);
    assert_eq!(result.buffer_size, 16 * 1024);
    assert_eq!(result.accuracy, Accuracy::Cached);
}

#[test]
fn test_result_serializes() {
    let dir = TempDir::new().unwrap();
    let engine = SpeedTestEngine::with_strategy(BufferedRead);
    let request = TestRequest::new(dir.path(), 16 * KIB).buffer_size(4096);
    let result = engine.start(request).unwrap().wait().into_result().unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["strategy"], "buffered");
    assert_eq!(json["accuracy"], "cached");
    assert!(json["write_speed_mbps"].as_f64().unwrap() > 0.0);
    assert!(json["warnings"].as_array().unwrap().len() == 1);
}
