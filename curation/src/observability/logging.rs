//! Subscriber installation.
//!
//! Runs always log to a file. A console layer on stderr is added when
//! requested. `RUST_LOG` overrides the configured level.

use crate::errors::ConfigurationError;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Also log to stderr.
    pub console: bool,
    /// Log file path.
    pub log_file: PathBuf,
    /// Write the file log as JSON lines.
    pub json: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: false,
            log_file: PathBuf::from("logs/clean-cdm.log"),
            json: false,
        }
    }
}

/// Flushes the file log when dropped. Keep it alive for the whole run.
#[derive(Debug)]
pub struct LogGuard {
    _file: WorkerGuard,
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, String), ConfigurationError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ConfigurationError::invalid(format!("log file '{}' has no file name", path.display())))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, file_name.to_string()))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if the log directory cannot be created or a subscriber is
/// already installed.
pub fn init_logging(options: &LoggingOptions) -> Result<LogGuard, ConfigurationError> {
    let (directory, file_name) = split_log_path(&options.log_file)?;
    std::fs::create_dir_all(&directory)
        .map_err(|e| ConfigurationError::invalid(format!("cannot create {}: {e}", directory.display())))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    let (file_json, file_text) = if options.json {
        (Some(fmt::layer().json().with_writer(writer)), None)
    } else {
        (None, Some(fmt::layer().with_ansi(false).with_writer(writer)))
    };
    let console = options
        .console
        .then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    Registry::default()
        .with(filter(&options.level))
        .with(file_json)
        .with(file_text)
        .with(console)
        .try_init()
        .map_err(|e| ConfigurationError::invalid(format!("logging already initialized: {e}")))?;

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        let (dir, file) = split_log_path(Path::new("logs/run.log")).unwrap();
        assert_eq!(dir, PathBuf::from("logs"));
        assert_eq!(file, "run.log");

        let (dir, file) = split_log_path(Path::new("run.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(file, "run.log");

        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_default_options() {
        let options = LoggingOptions::default();
        assert_eq!(options.level, "info");
        assert!(!options.console);
    }
}
