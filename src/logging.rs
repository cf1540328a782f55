//! Tracing configuration and log routing.
//!
//! The server logs to stdout using a compact formatter; the CLI logs to stderr so that JSON
//! written to stdout stays machine-readable. Both also log to a file: when `QUIZGEN_LOG_FILE`
//! is set, logs are appended to that path, otherwise to `logs/quizgen.log`. Per-chunk
//! warnings from long pipeline runs land in the file too, so a run can be audited after the
//! response has been returned.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Console stream receiving human-readable log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Long-running server processes.
    Stdout,
    /// Command-line runs that print results on stdout.
    Stderr,
}

/// Configure tracing for the HTTP server (stdout plus file).
pub fn init_tracing() {
    init_tracing_with(LogTarget::Stdout);
}

/// Configure tracing subscribers for the given console target and optional file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Keeps the non‑blocking writer guard in a global so buffered lines flush on exit.
pub fn init_tracing_with(target: LogTarget) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = match target {
        LogTarget::Stdout => fmt::layer().with_target(false).compact().boxed(),
        LogTarget::Stderr => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

/// Build a non‑blocking writer for file logging.
///
/// Returns `None` when the log directory or target file is unavailable; console logging still
/// works in that case.
fn configure_file_writer() -> Option<NonBlocking> {
    if let Ok(path) = std::env::var("QUIZGEN_LOG_FILE") {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let _ = LOG_GUARD.set(guard);
                Some(non_blocking)
            }
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        }
    } else {
        if let Err(err) = std::fs::create_dir_all("logs") {
            eprintln!("Failed to create logs directory: {err}");
            return None;
        }
        let file_appender = tracing_appender::rolling::never("logs", "quizgen.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(non_blocking)
    }
}
