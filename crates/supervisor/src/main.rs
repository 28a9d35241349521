use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingest_core::{
    create_store, load_config, metrics, validate_config, DepositStatusStore, JobStatusStore,
    Supervisor,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ingest-supervisor v{}", VERSION);

    // Determine config path
    let config_path = std::env::var("INGEST_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("ingest.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Store backend: {:?}", config.store.backend);
    info!("Supervisor owner: {}", config.supervisor.owner);
    debug!(
        "Effective configuration: {}",
        serde_json::to_string(&config).unwrap_or_default()
    );

    let registry = Registry::new();
    for metric in metrics::all_metrics() {
        registry
            .register(metric)
            .context("Failed to register metrics")?;
    }

    let store = create_store(&config.store).context("Failed to open status store")?;
    let supervisor = Arc::new(Supervisor::new(
        DepositStatusStore::new(store.clone()),
        JobStatusStore::new(store),
        config.supervisor.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(supervisor.run(shutdown_rx));

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    // The loop may already have exited, in which case there is no receiver.
    let _ = shutdown_tx.send(());
    handle.await.context("Supervisor task failed")?;

    log_metrics(&registry);
    info!("Shutdown complete");
    Ok(())
}

/// Write the final counter values to the log.
fn log_metrics(registry: &Registry) {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return;
    }
    for line in String::from_utf8_lossy(&buffer)
        .lines()
        .filter(|line| !line.starts_with('#'))
    {
        info!("{}", line);
    }
}
