//! Logging setup
//!
//! Logs go to stderr so stdout only carries check results, or to a file
//! through a non-blocking writer.

use std::io;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter variable read before `RUST_LOG`
pub const LOG_ENV: &str = "VERSION_CHECKER_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber.
///
/// When `log_file` is set the returned guard must be held until exit, or
/// buffered lines are lost.
pub fn init(format: LogFormat, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(io::stderr), None),
    };

    let filter = EnvFilter::try_new(filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    ))
    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .try_init()?,
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(log_file.is_none())
                    .with_writer(writer),
            )
            .try_init()?,
    }

    tracing::debug!("Logging initialized with format: {:?}", format);
    Ok(guard)
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log file path: {}", path.display()))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Own variable first, then `RUST_LOG`, then the default level
fn filter_directive(own: Option<String>, rust_log: Option<String>) -> String {
    own.filter(|v| !v.is_empty())
        .or(rust_log.filter(|v| !v.is_empty()))
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}
