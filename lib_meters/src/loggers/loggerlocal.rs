//! # Local Logging
//!
//! Sets up `tracing` for a long-running server process:
//! - a human-readable, colored console layer;
//! - a JSON layer written through a non-blocking, daily rolling file appender.
//!
//! `RUST_LOG` takes precedence over the configured level, so verbosity can be raised
//! for one run without editing the config file.

use std::path::{Path, PathBuf};

use glob::glob;
use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log level '{level}': {message}")]
    InvalidLevel { level: String, message: String },

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Rotates log files for a given application and log directory.
///
/// The rolling appender names files `<app_name>.<date>`; only the newest `keep` of
/// them survive. Returns how many files were deleted.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> usize {
    let pattern = format!("{}/{}.*", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = match glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(e) => {
            eprintln!("Invalid log rotation pattern {}: {}", pattern, e);
            return 0;
        }
    };

    // Dates sort lexicographically, newest first after the reverse.
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old_file in log_files.iter().skip(keep) {
        match std::fs::remove_file(old_file) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    removed
}

/// Installs the global subscriber and returns the appender's `WorkerGuard`.
///
/// The guard must stay alive for the lifetime of the process; dropping it flushes and
/// stops the background writer.
pub fn init_logging(app_name: &str, log_dir: &Path, log_level: &str) -> Result<WorkerGuard, LoggerError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggerError::CreateDir {
        path: log_dir.to_path_buf(),
        source,
    })?;

    // Today's file is created by the appender; keep a week of older ones.
    rotate_logs(app_name, log_dir, 7);

    let file_appender = rolling::daily(log_dir, app_name);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level).map_err(|e| LoggerError::InvalidLevel {
            level: log_level.to_string(),
            message: e.to_string(),
        })?,
    };

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInstalled(e.to_string()))?;

    info!(app = app_name, dir = %log_dir.display(), level = log_level, "Logging initialized");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_rotate_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for day in ["2026-10-10", "2026-10-12", "2026-10-11", "2026-10-13"] {
            File::create(dir.path().join(format!("server_meters.{}", day))).unwrap();
        }
        // Another application's log must be left alone.
        File::create(dir.path().join("other_app.2026-10-01")).unwrap();

        let removed = rotate_logs("server_meters", dir.path(), 2);
        assert_eq!(removed, 2);
        assert!(dir.path().join("server_meters.2026-10-13").exists());
        assert!(dir.path().join("server_meters.2026-10-12").exists());
        assert!(!dir.path().join("server_meters.2026-10-11").exists());
        assert!(!dir.path().join("server_meters.2026-10-10").exists());
        assert!(dir.path().join("other_app.2026-10-01").exists());
    }

    #[test]
    fn test_rotate_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(rotate_logs("server_meters", dir.path(), 1), 0);
    }
}
