//! Volspeed - real write and uncached read speed of removable media
//!
//! # Usage
//!
//! ```bash
//! # Test the drive mounted at /media/usb with the defaults (100 MB, 4 MB chunks)
//! volspeed speedtest /media/usb
//!
//! # Larger test, explicit strategy, machine-readable output
//! volspeed speedtest /media/usb --size 1G --strategy dd --json
//!
//! # See which read strategies this host supports
//! volspeed strategies
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use console::style;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use volspeed_core::Settings;

mod commands;

/// Volspeed - measure the real write and uncached read speed of a drive
#[derive(Parser)]
#[command(name = "volspeed")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress logs and the progress bar
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Suppress ALL output except errors (implies --quiet)
    #[arg(long, global = true)]
    silent: bool,

    /// Use this configuration file instead of the default location
    #[arg(long, global = true, value_name = "FILE", env = "VOLSPEED_CONFIG")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure write and read speed of the volume holding a directory
    Speedtest {
        /// Directory on the volume to test (a temporary file is created here)
        directory: PathBuf,

        /// Amount of data to write and read back (e.g., 100M, 1G)
        #[arg(short, long)]
        size: Option<String>,

        /// Transfer size per chunk, a power of two from 4K to 64M
        #[arg(short, long)]
        buffer_size: Option<String>,

        /// Read strategy: auto, direct, nocache, dd or buffered
        #[arg(long)]
        strategy: Option<String>,

        /// Never run the system-wide cache purge
        #[arg(long)]
        no_purge: bool,

        /// Timeout for the dd helper in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Output the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the read strategies available on this system
    Strategies {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show or initialize the configuration file
    Config {
        /// Create a configuration file with default values
        #[arg(long)]
        init: bool,

        /// Print the configuration file path
        #[arg(long)]
        path: bool,

        /// Output the configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    // Set up panic handler for nicer error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{} {}", style("Error:").red().bold(), panic_info);
    }));

    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        // Show cause chain in verbose mode
        if std::env::var("RUST_BACKTRACE").is_ok() {
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  {} {}", style("Caused by:").yellow(), cause);
                source = cause.source();
            }
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let silent = cli.silent;

    // --silent implies --quiet (no logs at all)
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet || silent {
        EnvFilter::new("off")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config_path = cli.config_file.clone().or_else(Settings::config_path);
    let settings = Settings::load_from_path(config_path.clone());
    let quiet = cli.quiet || silent || settings.behavior.quiet;

    // Cleared by the first Ctrl+C; a second one exits immediately
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        if !r.load(Ordering::SeqCst) {
            if !silent {
                eprintln!("\n{}", style("Forced exit").red().bold());
            }
            std::process::exit(130);
        }
        r.store(false, Ordering::SeqCst);
        if !silent {
            eprintln!(
                "\n{}",
                style("Cancelling... Press Ctrl+C again to force exit").yellow()
            );
        }
    })?;

    match cli.command {
        Commands::Speedtest {
            directory,
            size,
            buffer_size,
            strategy,
            no_purge,
            timeout,
            json,
        } => commands::speedtest::execute(commands::speedtest::SpeedTestArgs {
            directory,
            size,
            buffer_size,
            strategy,
            no_purge,
            timeout,
            json,
            settings: settings.speedtest,
            running,
            quiet,
            silent,
        }),
        Commands::Strategies { json } => commands::strategies::execute(json, silent),
        Commands::Config { init, path, json } => {
            commands::config::execute(commands::config::ConfigArgs {
                init,
                path,
                json,
                silent,
                config_file: config_path,
            })
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}
