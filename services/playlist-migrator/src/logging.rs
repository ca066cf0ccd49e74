//!
//! src/logging.rs
//!
//! Initializes logger. Output goes to stderr so that stdout stays reserved
//! for the summaries the cli prints
//!

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_error::ErrorLayer;
use tracing_appender::non_blocking;

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::MigrateError;

pub struct LoggingGuard(tracing_appender::non_blocking::WorkerGuard);

pub fn init_logging(cfg: &LoggingConfig) -> Result<LoggingGuard, MigrateError> {
    let (writer, guard) = non_blocking(std::io::stderr());
    let filter = std::env::var("RUST_LOG")
        .ok()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(cfg.filter_directives.clone()));

    let time = fmt::time::UtcTime::rfc_3339();
    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_timer(time)
        .with_ansi(cfg.with_ansi)
        .with_target(cfg.include_target)
        .with_file(cfg.include_file_line)
        .with_line_number(cfg.include_file_line);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    let installed = match cfg.format {
        LogFormat::Json => registry
            .with(fmt_layer
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt_layer.compact()).try_init(),
    };
    installed.map_err(|e| MigrateError::Config(format!("logger already set: {e}")))?;

    Ok( LoggingGuard(guard) )
}
