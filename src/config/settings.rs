//! Application settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ConfigError;
use crate::core::assembler::PublishPolicy;
use crate::core::protocol::ReceiverDialect;
use crate::core::provider::{ListenerDefaults, ProviderSettings};
use crate::core::session::SessionConfig;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Receiver to use when none is given
    pub device: DeviceSettings,
    /// Session timing and parsing
    pub session: SessionSettings,
    /// Listener defaults
    pub listener: ListenerSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the default location, or defaults if absent
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&super::config_path()?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Load config from `path`, or defaults if the file does not exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Provider settings built from this configuration
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            session: self.session.session_config(self.device.connect_timeout()),
            poll_interval: self.session.poll_interval(),
            location_timeout: self.session.location_timeout(),
            listener: self.listener.defaults(),
        }
    }
}

/// Default receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Device address, e.g. `/dev/rfcomm0` or `tcp://localhost:10110`
    pub address: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl DeviceSettings {
    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: None,
            connect_timeout_ms: 3000,
        }
    }
}

/// Session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Pause after connecting before configuring, milliseconds
    pub settle_delay_ms: u64,
    /// Pause before every read, milliseconds
    pub pre_read_delay_ms: u64,
    /// Read deadline, milliseconds
    pub read_timeout_ms: u64,
    /// Pause after a position update, milliseconds
    pub idle_delay_ms: u64,
    /// Pause before reconnecting, milliseconds
    pub reconnect_cooldown_ms: u64,
    /// Read buffer size in bytes
    pub buffer_size: usize,
    /// Full reads skipped in a row after a position update (0 disables)
    pub max_consecutive_skips: u32,
    /// When snapshots are published
    pub publish_policy: PublishPolicy,
    /// Send output configuration on connect
    pub configure_device: bool,
    /// Dialects to configure
    pub dialects: Vec<ReceiverDialect>,
    /// `get_location` poll interval, milliseconds
    pub poll_interval_ms: u64,
    /// Default `get_location` timeout, seconds
    pub location_timeout_secs: u64,
}

impl SessionSettings {
    /// Session configuration with `connect_timeout`
    pub fn session_config(&self, connect_timeout: Duration) -> SessionConfig {
        let dialects = if self.configure_device {
            self.dialects.clone()
        } else {
            Vec::new()
        };

        SessionConfig::default()
            .connect_timeout(connect_timeout)
            .delays(
                Duration::from_millis(self.pre_read_delay_ms),
                Duration::from_millis(self.idle_delay_ms),
                Duration::from_millis(self.settle_delay_ms),
                Duration::from_millis(self.reconnect_cooldown_ms),
            )
            .read_timeout(Duration::from_millis(self.read_timeout_ms))
            .buffer_size(self.buffer_size)
            .max_consecutive_skips(self.max_consecutive_skips)
            .publish_policy(self.publish_policy)
            .dialects(dialects)
    }

    /// `get_location` poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Default `get_location` timeout
    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            settle_delay_ms: 200,
            pre_read_delay_ms: 100,
            read_timeout_ms: 1100,
            idle_delay_ms: 500,
            reconnect_cooldown_ms: 1000,
            buffer_size: session.buffer_size,
            max_consecutive_skips: session.max_consecutive_skips,
            publish_policy: session.publish_policy,
            configure_device: true,
            dialects: session.dialects,
            poll_interval_ms: 250,
            location_timeout_secs: 30,
        }
    }
}

/// Listener defaults, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Delivery interval
    pub interval_secs: u64,
    /// Grace period before a timeout notification
    pub timeout_secs: u64,
    /// Oldest cached location delivered on timeout
    pub max_age_secs: u64,
}

impl ListenerSettings {
    /// Listener defaults
    pub fn defaults(&self) -> ListenerDefaults {
        ListenerDefaults {
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            max_age: Duration::from_secs(self.max_age_secs),
        }
    }
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            timeout_secs: 1,
            max_age_secs: 1,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter, e.g. `info` or `bluegps_core=debug`
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.device.address = Some("/dev/rfcomm1".to_string());
        config.session.max_consecutive_skips = 0;
        config.session.publish_policy = PublishPolicy::Position;
        config.logging.format = LogFormat::Json;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\nread_timeout_ms = 2000\ndialects = [\"garmin\"]\n\n[listener]\ninterval_secs = 5\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.session.read_timeout_ms, 2000);
        assert_eq!(config.session.dialects, vec![ReceiverDialect::Garmin]);
        assert_eq!(config.session.idle_delay_ms, 500);
        assert_eq!(config.listener.defaults().interval, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_listener_defaults_mean_state_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[listener]\ninterval_secs = 0\ntimeout_secs = 0\n").unwrap();

        let defaults = AppConfig::load_from(&path).unwrap().listener.defaults();
        let params =
            crate::core::provider::ListenerParams::from_seconds(-1, -1, -1, &defaults).unwrap();
        assert_eq!(params.interval, None);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nread_timeout_ms = \"soon\"\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_provider_settings() {
        let mut config = AppConfig::default();
        config.session.configure_device = false;
        config.device.connect_timeout_ms = 500;

        let settings = config.provider_settings();
        assert!(settings.session.dialects.is_empty());
        assert_eq!(settings.session.connect_timeout, Duration::from_millis(500));
        assert_eq!(settings.session.read_timeout, Duration::from_millis(1100));
        assert_eq!(settings.location_timeout, Duration::from_secs(30));
    }
}
