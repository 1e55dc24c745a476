//! Configuration file management command

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use volspeed_core::Settings;

/// Arguments for the config command
pub struct ConfigArgs {
    /// Initialize a new configuration file with defaults
    pub init: bool,
    /// Show the path to the configuration file
    pub path: bool,
    /// Show configuration in JSON format
    pub json: bool,
    /// Suppress output (for scripting)
    pub silent: bool,
    /// Effective configuration file path
    pub config_file: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    if args.path {
        if let Some(path) = &args.config_file {
            if !args.silent {
                println!("{}", path.display());
            }
        } else if !args.silent {
            eprintln!("{}", style("Could not determine config path").yellow());
        }
        return Ok(());
    }

    if args.init {
        return init_config(args.config_file, args.silent);
    }

    show_config(args.config_file, args.json, args.silent)
}

/// Write a configuration file with default values, leaving an existing one alone
fn init_config(config_path: Option<PathBuf>, silent: bool) -> Result<()> {
    let path = config_path.context("Could not determine configuration directory")?;

    if path.exists() {
        if !silent {
            eprintln!(
                "{} Configuration file already exists at: {}",
                style("Warning:").yellow(),
                path.display()
            );
            eprintln!("Use a text editor to modify it, or delete it to re-initialize.");
        }
        return Ok(());
    }

    let saved_path = Settings::default()
        .save_to_path(Some(path))
        .context("Failed to save configuration file")?;

    if !silent {
        println!(
            "{} Created configuration file at: {}",
            style("Success:").green(),
            saved_path.display()
        );
        println!();
        println!("Example settings:");
        println!();
        println!("  [speedtest]");
        println!("  test_size = \"1G\"      # Write and read back 1 GB");
        println!("  strategy = \"dd\"       # auto, direct, nocache, dd, buffered");
        println!("  purge_cache = false   # Never run the system cache purge");
    }

    Ok(())
}

/// Show the current configuration
fn show_config(config_path: Option<PathBuf>, json: bool, silent: bool) -> Result<()> {
    if silent {
        return Ok(());
    }

    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let settings = Settings::load_from_path(config_path.clone());

    if json {
        let json_output = serde_json::to_string_pretty(&settings)
            .context("Failed to serialize settings to JSON")?;
        println!("{}", json_output);
        return Ok(());
    }

    println!("{}", style("Volspeed Configuration").bold());
    println!();

    if let Some(path) = &config_path {
        if config_exists {
            println!("  {} {}", style("Config file:").dim(), path.display());
        } else {
            println!(
                "  {} {} {}",
                style("Config file:").dim(),
                path.display(),
                style("(not found, using defaults)").yellow()
            );
        }
    }
    println!();

    let speedtest = &settings.speedtest;
    println!("{}", style("[speedtest]").cyan());
    println!("  test_size = \"{}\"", speedtest.test_size);
    println!("  buffer_size = \"{}\"", speedtest.buffer_size);
    println!("  strategy = \"{}\"", speedtest.strategy);
    println!("  purge_cache = {}", speedtest.purge_cache);
    println!("  helper_timeout_secs = {}", speedtest.helper_timeout_secs);
    println!("  json = {}", speedtest.json);
    println!();

    println!("{}", style("[behavior]").cyan());
    println!("  quiet = {}", settings.behavior.quiet);

    if !config_exists {
        println!();
        println!(
            "{}",
            style("Run 'volspeed config --init' to create a configuration file.").dim()
        );
    }

    Ok(())
}
