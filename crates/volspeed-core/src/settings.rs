//! Persistent user settings for Volspeed
//!
//! Settings live in a TOML file at:
//! - Linux: `~/.config/volspeed/volspeed_config.toml`
//! - macOS: `~/Library/Application Support/volspeed/volspeed_config.toml`
//! - Windows: `%APPDATA%\volspeed\volspeed_config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! [speedtest]
//! test_size = "100M"
//! buffer_size = "4M"
//! strategy = "auto"
//! purge_cache = true
//! helper_timeout_secs = 120
//! json = false
//!
//! [behavior]
//! quiet = false
//! ```

use crate::config::EngineConfig;
use crate::error::Result;
use crate::request::TestRequest;
use crate::strategy::StrategyChoice;
use crate::units::parse_size;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "volspeed_config.toml";

const APP_NAME: &str = "volspeed";

/// User settings loaded from the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Speed-test defaults
    pub speedtest: SpeedTestSettings,

    /// General behavior
    pub behavior: BehaviorSettings,
}

/// Defaults for `volspeed speedtest`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeedTestSettings {
    /// Amount of data to write and read back (e.g., "100M", "1G")
    pub test_size: String,

    /// Transfer size per chunk (e.g., "4M", "64K")
    pub buffer_size: String,

    /// Read strategy: auto, direct, nocache, dd or buffered
    pub strategy: String,

    /// Whether the system cache purge may run
    pub purge_cache: bool,

    /// Upper bound on the dd helper, in seconds
    pub helper_timeout_secs: u64,

    /// Output results as JSON
    pub json: bool,
}

impl Default for SpeedTestSettings {
    fn default() -> Self {
        Self {
            test_size: "100M".to_string(),
            buffer_size: "4M".to_string(),
            strategy: "auto".to_string(),
            purge_cache: true,
            helper_timeout_secs: 120,
            json: false,
        }
    }
}

impl SpeedTestSettings {
    /// Engine configuration described by these settings
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let strategy: StrategyChoice = self.strategy.parse()?;
        Ok(EngineConfig::new()
            .strategy(strategy)
            .purge_cache(self.purge_cache)
            .helper_timeout(Duration::from_secs(self.helper_timeout_secs)))
    }

    /// Request for a run in `dir` with these sizes
    pub fn request(&self, dir: &Path) -> Result<TestRequest> {
        let test_size = parse_size(&self.test_size)?;
        let buffer_size = usize::try_from(parse_size(&self.buffer_size)?).map_err(|_| {
            crate::Error::InvalidRequest(format!("buffer size {} is too large", self.buffer_size))
        })?;
        Ok(TestRequest::new(dir, test_size).buffer_size(buffer_size))
    }
}

/// General behavior settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehaviorSettings {
    /// Whether to suppress non-error output
    pub quiet: bool,
}

impl Settings {
    /// Load settings from the configuration file
    ///
    /// Returns default settings if the file doesn't exist or can't be parsed
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            tracing::debug!("No config path available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!("Failed to read config file {:?}: {}", path, e);
                return Self::default();
            }
        };

        toml::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse config file {:?}: {}", path, e);
            Self::default()
        })
    }

    /// Save settings to the configuration file
    pub fn save(&self) -> std::result::Result<PathBuf, SettingsError> {
        self.save_to_path(Self::config_path())
    }

    /// Save settings to a specific path, creating parent directories
    pub fn save_to_path(
        &self,
        path: Option<PathBuf>,
    ) -> std::result::Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;
        std::fs::write(&path, contents).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Path of the configuration file
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Path of the configuration directory
    pub fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Check if a configuration file exists
    pub fn config_exists() -> bool {
        Self::config_path().is_some_and(|p| p.exists())
    }

    /// Default configuration file content
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate default config"))
    }
}

/// Errors that can occur when working with settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// No configuration directory available
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// Failed to read or write config file
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path that caused the error
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    Serialize(toml::ser::Error),
}
