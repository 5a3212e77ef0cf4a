//! Ops node entry point.

use anyhow::Result;
use ops_node::{config::load_config, NodeRuntime};
use ops_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Held until exit so spans are flushed
    let _telemetry = init_telemetry(TelemetryConfig::from_env()).await?;

    let config = load_config()?;
    let mut node = NodeRuntime::new(config)?;
    node.start().await?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    node.shutdown().await;
    Ok(())
}
