//! Logging setup shared by the binary and embedding applications.
use std::{fs::OpenOptions, io, path::Path, str::FromStr};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use crate::error::PoolError;

/// Initializes logging to stdout and optionally to a file.
///
/// The level comes from `RUST_LOG` and falls back to `info` when unset or unparsable.
/// When `log_file` is set, lines are appended to it in addition to stdout.
pub fn init_logging(log_file: Option<&Path>) -> Result<(), PoolError> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level_filter = LevelFilter::from_str(&rust_log).unwrap_or(LevelFilter::INFO);
    let env_filter = EnvFilter::new(log_level_filter.to_string());

    let stdout_layer = fmt::layer().with_writer(io::stdout);
    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let file_layer = fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(file));
            Box::new(
                Registry::default()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer),
            )
        }
        None => Box::new(Registry::default().with(env_filter).with(stdout_layer)),
    };

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| PoolError::Io(io::Error::new(io::ErrorKind::Other, e)))
}
