//! Shared logging utilities for Smart Opex binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "smartopex=info,smartopex_db=info,smartopex_ocr=info,smartopex_worker=info";

/// Logging configuration shared by Smart Opex binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a daily-rolling file writer and stderr output.
///
/// The returned guard must be held for the lifetime of the process so
/// buffered log lines are flushed on exit.
pub fn init_logging(config: LogConfig<'_>) -> Result<WorkerGuard> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_appender =
        tracing_appender::rolling::daily(log_dir, format!("{}.log", config.app_name));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(guard)
}

/// Get the Smart Opex home directory: ~/.smartopex
pub fn smartopex_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SMARTOPEX_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".smartopex")
}

/// Get the logs directory: ~/.smartopex/logs
pub fn logs_dir() -> PathBuf {
    smartopex_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}
