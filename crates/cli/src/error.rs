//! Top-level error type for the binary.

use domain::DomainError;
use event_store::EventStoreError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("Metrics setup failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}
