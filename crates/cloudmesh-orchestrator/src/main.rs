//! CloudMesh Controller - Main Entry Point

use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudmesh_common::ProviderAdapter;
use cloudmesh_orchestrator::{simulated_fleet, Capabilities, ControlPlaneConfig, MultiCloudManager, SimulatedProbe};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("CloudMesh Controller v{}", env!("CARGO_PKG_VERSION"));

    let config = ControlPlaneConfig::from_env().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    // Simulated adapters until real provider clients are wired in
    let adapters: HashMap<String, Arc<dyn ProviderAdapter>> = simulated_fleet(&config.providers)
        .into_iter()
        .map(|(name, adapter)| (name, adapter as Arc<dyn ProviderAdapter>))
        .collect();
    let capabilities = Capabilities::new(adapters, Arc::new(SimulatedProbe::new()));

    let manager = MultiCloudManager::new(config, capabilities).context("building control plane")?;
    manager.start();

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    manager.shutdown().await;
    Ok(())
}
