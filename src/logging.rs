//! Diagnostic tracing setup.
//!
//! Diagnostics go to stderr (text or JSON) and, when a log directory is given,
//! to a daily-rolling JSON file. User-facing progress is the `ui` module's job
//! and never goes through here.
//!
//! `RUST_LOG` overrides the default level (`warn`, or `info` with `--verbose`).

use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Keeps the file writer flushing; drop it only at process exit.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

pub fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "info" } else { "warn" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber. Call once, from `main`.
pub fn init(format: LogFormat, verbose: bool, log_dir: Option<&Path>) -> Result<LogGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_filter(default_filter(verbose))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_filter(default_filter(verbose))
            .boxed(),
    });

    let mut guard = None;
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let appender = tracing_appender::rolling::daily(dir, "warden.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(default_filter(true))
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    Ok(LogGuard { _file: guard })
}
