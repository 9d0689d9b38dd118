//! Tracing subscriber setup
//!
//! `RUST_LOG` overrides the configured level. When a log file is
//! configured, events are also written there through a non-blocking
//! writer; keep the returned guard alive until exit so it is flushed.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::config::{self, LogFormat, LoggingConfig};

/// Resolve the configured log file; relative paths land in the log directory
pub fn log_file_path(config: &LoggingConfig) -> Option<PathBuf> {
    let file = config.file.as_ref()?;
    if file.is_absolute() {
        return Some(file.clone());
    }
    Some(match config::log_dir() {
        Some(dir) => dir.join(file),
        None => file.clone(),
    })
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// `level` overrides `config.level` (used for `--verbose` / `--quiet`).
/// Returns `Err` if a subscriber is already installed.
pub fn init(
    config: &LoggingConfig,
    level: Option<&str>,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let filter = filter(level.unwrap_or(&config.level));

    let (file_writer, guard) = match log_file_path(config) {
        Some(path) => {
            let dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir)?;
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "bluegps.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match (config.format, file_writer) {
        (LogFormat::Text, None) => builder.with_writer(std::io::stderr).try_init()?,
        (LogFormat::Text, Some(file)) => builder
            .with_writer(std::io::stderr.and(file))
            .with_ansi(false)
            .try_init()?,
        (LogFormat::Json, None) => builder.json().with_writer(std::io::stderr).try_init()?,
        (LogFormat::Json, Some(file)) => builder
            .json()
            .with_writer(std::io::stderr.and(file))
            .try_init()?,
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_log_file_path() {
        let mut config = LoggingConfig::default();
        assert!(log_file_path(&config).is_none());

        config.file = Some(PathBuf::from("/var/log/bluegps.log"));
        assert_eq!(log_file_path(&config).unwrap(), Path::new("/var/log/bluegps.log"));

        config.file = Some(PathBuf::from("gps.log"));
        assert!(log_file_path(&config).unwrap().ends_with("gps.log"));
    }
}
