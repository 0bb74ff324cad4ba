//! Configuration module for leakrig
//!
//! This module handles:
//! - Replay settings (`leakrig.toml`): speed, timestamp mode, shutdown wait
//! - Site configuration (JSON): locations and the sensor roster
//!
//! # Config Location
//!
//! Without an explicit path, replay settings are read from the platform
//! configuration directory:
//! - **Linux**: `~/.config/leakrig/leakrig.toml`
//! - **macOS**: `~/Library/Application Support/leakrig/leakrig.toml`
//! - **Windows**: `%APPDATA%\leakrig\leakrig.toml`
//!
//! # Example
//!
//! ```ignore
//! use leakrig::config::ReplayConfig;
//!
//! let config = ReplayConfig::load_or_default();
//! let sensors = config.load_sensors()?;
//! ```

pub mod sensors;

pub use sensors::{LocationConfig, SensorDescriptor, SiteConfig};

use crate::error::{ReplayError, Result};
use crate::session::clock::validate_speed;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "leakrig";

/// Replay settings filename
pub const CONFIG_FILE: &str = "leakrig.toml";

/// Default time to wait for the timer thread on shutdown
pub const DEFAULT_SHUTDOWN_AWAIT_MS: u64 = 5000;

/// Get the application config directory path
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default replay settings file
pub fn default_config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join(CONFIG_FILE))
}

fn default_speed() -> f64 {
    1.0
}

fn default_shutdown_await_ms() -> u64 {
    DEFAULT_SHUTDOWN_AWAIT_MS
}

/// Replay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Initial speed factor
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Publish recorded timestamps instead of shifting onto the start time
    #[serde(default)]
    pub use_original_timestamps: bool,

    /// Bounded wait for the timer thread during shutdown
    #[serde(default = "default_shutdown_await_ms")]
    pub shutdown_await_ms: u64,

    /// Site file providing the sensor roster
    #[serde(default)]
    pub site_config: Option<PathBuf>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            use_original_timestamps: false,
            shutdown_await_ms: DEFAULT_SHUTDOWN_AWAIT_MS,
            site_config: None,
        }
    }
}

impl ReplayConfig {
    /// Load and validate settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplayError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ReplayError::Config(format!("Failed to parse config {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from the default location, returning defaults if the
    /// file is missing or invalid
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load replay config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save settings as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ReplayError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ReplayError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            ReplayError::Config(format!("Failed to write config {:?}: {}", path, e))
        })
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        validate_speed(self.speed)
            .map_err(|e| ReplayError::Config(format!("speed: {}", e)))?;
        if self.shutdown_await_ms == 0 {
            return Err(ReplayError::Config(
                "shutdown_await_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Sensor roster from the configured site file, empty if none is set
    pub fn load_sensors(&self) -> Result<Vec<SensorDescriptor>> {
        match &self.site_config {
            Some(path) => Ok(SiteConfig::load(path)?.sensors()),
            None => Ok(Vec::new()),
        }
    }
}
