//! Speedtest command - writes a temporary file and reads it back uncached
//!
//! The run happens on the engine's worker thread; this command renders its
//! event stream as a progress bar and prints the measured bandwidth.

use anyhow::{bail, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use volspeed_core::{
    format_duration, format_size, format_speed, Accuracy, Error, ProgressEvent, SpeedTestEngine,
    SpeedTestSettings, TestEvent, TestOutcome, TestResult,
};

/// Arguments for the speedtest command
pub struct SpeedTestArgs {
    /// Directory on the volume under test
    pub directory: PathBuf,
    /// Test size override (e.g., "1G")
    pub size: Option<String>,
    /// Buffer size override (e.g., "1M")
    pub buffer_size: Option<String>,
    /// Strategy override
    pub strategy: Option<String>,
    /// Disable the system cache purge
    pub no_purge: bool,
    /// Helper timeout override in seconds
    pub timeout: Option<u64>,
    /// Output in JSON format
    pub json: bool,
    /// Defaults from the configuration file
    pub settings: SpeedTestSettings,
    /// Cleared by Ctrl+C
    pub running: Arc<AtomicBool>,
    /// Hide the progress bar
    pub quiet: bool,
    /// Silent mode (minimal output)
    pub silent: bool,
}

/// Execute the speedtest command
pub fn execute(args: SpeedTestArgs) -> Result<()> {
    let settings = effective_settings(&args);
    let json = args.json || settings.json;
    // JSON goes to stdout alone
    let silent = args.silent || json;

    let engine = SpeedTestEngine::with_config(settings.engine_config()?)?;
    if !args.directory.is_dir() {
        bail!("{} is not a directory", args.directory.display());
    }
    let request = settings.request(&args.directory)?;
    request.validate()?;

    println_if!(
        silent,
        "{} Testing {}",
        style("▶").cyan(),
        style(args.directory.display()).bold()
    );
    println_if!(
        silent,
        "  Size: {}, buffer: {}, strategy: {} ({})",
        format_size(request.test_size()),
        format_size(request.get_buffer_size() as u64),
        engine.strategy().kind(),
        engine.strategy().kind().description()
    );
    println_if!(silent);

    let mut handle = engine.start(request)?;

    // Forward Ctrl+C to the worker
    let running = Arc::clone(&args.running);
    let cancel = handle.cancel_handle();
    std::thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        cancel.store(true, Ordering::SeqCst);
    });

    let pb = create_progress_bar(args.quiet || silent);
    let mut outcome = None;

    while let Some(event) = handle.recv() {
        match event {
            TestEvent::Progress(progress) => render_progress(&pb, &progress, silent),
            TestEvent::Finished(finished) => outcome = Some(finished),
        }
    }

    pb.finish_and_clear();

    match outcome {
        Some(TestOutcome::Completed(result)) => {
            if json {
                output_json(&result)
            } else {
                output_human_readable(&result, silent);
                Ok(())
            }
        }
        Some(TestOutcome::Cancelled) => {
            println_if!(silent, "\n{} Speed test cancelled", style("✗").red());
            Ok(())
        }
        Some(TestOutcome::Failed(e)) => Err(failure(e)),
        None => bail!("Speed test ended without a result"),
    }
}

/// Merge command line overrides into the configured defaults
fn effective_settings(args: &SpeedTestArgs) -> SpeedTestSettings {
    let mut settings = args.settings.clone();

    if let Some(size) = &args.size {
        settings.test_size = size.clone();
    }
    if let Some(buffer_size) = &args.buffer_size {
        settings.buffer_size = buffer_size.clone();
    }
    if let Some(strategy) = &args.strategy {
        settings.strategy = strategy.clone();
    }
    if args.no_purge {
        settings.purge_cache = false;
    }
    if let Some(timeout) = args.timeout {
        settings.helper_timeout_secs = timeout;
    }

    settings
}

fn failure(e: Error) -> anyhow::Error {
    match e {
        Error::SubprocessTimeout { .. } => {
            anyhow::Error::new(e).context("Read helper took too long; try --timeout or --strategy")
        }
        e => anyhow::Error::new(e),
    }
}

fn create_progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░"),
    );
    pb
}

fn render_progress(pb: &ProgressBar, progress: &ProgressEvent, silent: bool) {
    if progress.is_warning() {
        if !silent {
            pb.println(format!("  {} {}", style("⚠").yellow(), progress.message));
        }
        return;
    }

    pb.set_position(u64::from(progress.percent));
    pb.set_message(progress.message.clone());
}

/// Output results as JSON
fn output_json(result: &TestResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    println!("{}", json);
    Ok(())
}

/// Output results in human-readable format
fn output_human_readable(result: &TestResult, silent: bool) {
    println_if!(silent, "{}", style("Results:").bold().green());
    println_if!(
        silent,
        "  Write Speed:  {}  ({} in {})",
        style(format_speed(result.write_speed_mbps)).cyan().bold(),
        format_size(result.bytes_written),
        format_duration(result.write_elapsed)
    );
    println_if!(
        silent,
        "  Read Speed:   {}  ({} in {})",
        style(format_speed(result.read_speed_mbps)).cyan().bold(),
        format_size(result.bytes_read),
        format_duration(result.read_elapsed)
    );
    println_if!(silent, "  Strategy:     {}", result.strategy);
    println_if!(silent, "  Accuracy:     {}", accuracy_label(result.accuracy));

    if result.accuracy < Accuracy::Physical {
        println_if!(silent);
        println_if!(
            silent,
            "{} {}",
            style("⚠").yellow(),
            style(result.accuracy.description()).yellow()
        );
    }

    println_if!(silent);
    println_if!(silent, "{} Speed test complete!", style("✓").green().bold());
}

fn accuracy_label(accuracy: Accuracy) -> String {
    match accuracy {
        Accuracy::Physical => style(accuracy).green().to_string(),
        Accuracy::Approximate => style(accuracy).yellow().to_string(),
        Accuracy::Cached => style(accuracy).red().to_string(),
    }
}
