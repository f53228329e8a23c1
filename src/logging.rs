//! Tracing setup for the `chvisor` binary.
//!
//! Logs always go to stderr, filtered by `RUST_LOG` (default `info`). When a
//! log directory is given they are also written, without colours, to
//! `chvisor.log` in it.

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the file writer alive; dropping it flushes buffered lines.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init(log_dir: Option<&Path>) -> LogGuard {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        Some(tracing_appender::non_blocking(
            tracing_appender::rolling::never(dir, "chvisor.log"),
        ))
    });

    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();

            LogGuard {
                _file_guard: Some(guard),
            }
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();

            LogGuard { _file_guard: None }
        }
    }
}
