//! `es-cli` entry point.

use cli::config::{Config, StoreBackend};
use cli::error::CliError;
use cli::scenario;
use domain::OrderService;
use event_store::{InMemoryEventStore, PostgresEventStore};

#[tokio::main]
async fn main() -> Result<(), CliError> {
    // 1. Configuration and tracing
    let config = Config::from_env()?;
    cli::init_tracing(&config)?;

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Run the scenario against the configured store
    let report = match &config.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory event store");
            let service = OrderService::new(InMemoryEventStore::new())?;
            scenario::run(&service).await?
        }
        StoreBackend::Postgres { database_url } => {
            tracing::info!(max_connections = config.max_connections, "using PostgreSQL event store");
            let store = PostgresEventStore::connect(database_url, config.max_connections).await?;
            store.run_migrations().await?;
            let service = OrderService::new(store)?;
            scenario::run(&service).await?
        }
    };

    println!("{report}");
    println!();
    println!("{}", metrics_handle.render());
    Ok(())
}
