//! Tracing setup: console output plus an optional daily log file.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Split a base path like `logs/telechat` into its directory and file prefix.
fn split_base(base: &str) -> (PathBuf, String) {
    let expanded = PathBuf::from(shellexpand::tilde(base).as_ref());
    let dir = match expanded.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = expanded
        .file_name()
        .map_or_else(|| "telechat".to_string(), |n| n.to_string_lossy().into_owned());
    (dir, prefix)
}

/// Daily rolling appender writing `<prefix>.<YYYY-MM-DD>.log`.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn file_appender(base: &str) -> Result<RollingFileAppender> {
    let (dir, prefix) = split_base(base);
    create_dir(&dir)?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(&dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `config.filter`. The returned guard flushes the file
/// writer on drop and must live as long as the process logs.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.filter.as_str().into());

    let (file_layer, guard) = match &config.file {
        Some(base) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(base)?);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
