//! Configuration module
//!
//! Handles application settings stored as TOML in the platform config
//! directory.

mod settings;

pub use settings::{
    AppConfig, DeviceSettings, ListenerSettings, LogFormat, LoggingConfig, SessionSettings,
};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid configuration
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialised
    #[error("Could not serialise configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No home directory to derive the config location from
    #[error("Could not determine config directory")]
    NoConfigDir,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "bluegps", "bluegps")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("logs"))
}

/// Default configuration file path
pub fn config_path() -> Result<PathBuf, ConfigError> {
    config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}
