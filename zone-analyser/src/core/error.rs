use std::path::PathBuf;

use thiserror::Error;
use zone_store::StoreError;

/// Failures while loading a monitor's configuration.
#[derive(Error, Debug)]
pub enum AnalyserError {
    #[error("Configuration store error: {0}")]
    ConfigLoad(#[from] StoreError),

    #[error("Zone index {index} out of range for monitor with {count} zones")]
    InvalidZoneIndex { index: usize, count: usize },

    #[error("Cannot read plugin configuration file {path:?}: {source}")]
    PluginConfigFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures while opening or registering a plugin module.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Could not load '{path}' ({reason})")]
    Load { path: PathBuf, reason: String },

    #[error("'{path}' is not a valid plugin ({reason})")]
    NotAPlugin { path: PathBuf, reason: String },

    #[error("Could not load '{path}' (engine version mismatch: expected={expected} / plugin={actual})")]
    VersionMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Registration of '{path}' failed: {reason}")]
    RegisterFailed { path: PathBuf, reason: String },
}

/// Faults raised while a detector evaluates a frame or loads its settings.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Zone index {index} out of range ({count} zones)")]
    ZoneIndexOutOfRange { index: usize, count: usize },

    #[error("Plugin fault: {0}")]
    Plugin(String),

    #[error("Invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Anything that can stop a monitor session from starting or reloading.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analyser(#[from] AnalyserError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}
