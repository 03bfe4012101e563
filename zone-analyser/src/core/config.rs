/*!
Configuration for a zone analyser process
*/

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyserConfig {
    pub monitor: MonitorConfig,
    pub store: StoreConfig,
    pub plugins: PluginsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Monitor whose zones are analysed
    pub id: u32,
    /// Whether the monitor runs its built-in motion detection
    pub native_detection: bool,
    /// Seconds between full reloads in watch mode
    pub reload_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding zones and plugin settings
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned for plugin modules
    pub dir: PathBuf,
    /// Optional file every plugin must have a `[name]` section in
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by RUST_LOG
    pub level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            id: 1,
            native_detection: true,
            reload_interval_secs: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./zones.db"),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./plugins"),
            config_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AnalyserConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reload interval in watch mode, at least one second.
    pub fn reload_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.monitor.reload_interval_secs.unwrap_or(60).max(1))
    }
}
