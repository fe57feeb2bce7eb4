//! Runs the order scenario against a configured event store, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod scenario;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{Config, LogFormat};
use error::CliError;

/// Installs the global tracing subscriber described by `config`.
pub fn init_tracing(config: &Config) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }
    Ok(())
}
