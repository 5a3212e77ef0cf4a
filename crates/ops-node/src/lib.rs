//! # Ops Node
//!
//! Runs the operations event bus as a service.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logs, optional OTLP traces, Prometheus registry)
//! 2. Load configuration (defaults, `OPS_CONFIG` file, environment)
//! 3. Build the event bus and register built-in handlers
//! 4. Start the gateway
//! 5. Wait for Ctrl+C, then stop the bus and the gateway
//!
//! ```text
//!  HTTP / WS clients ──► ops-gateway ──► EventBus ──┬─► audit-log (local)
//!                                                   ├─► HTTP destinations
//!                                                   └─► WebSocket hub
//! ```

pub mod config;
pub mod handlers;

use anyhow::{Context, Result};
use ops_gateway::{GatewayConfig, GatewayService};
use shared_bus::EventBus;
use std::net::SocketAddr;
use tracing::info;

/// The running node: bus, built-in handlers and gateway.
pub struct NodeRuntime {
    gateway: GatewayService,
}

impl NodeRuntime {
    /// Build the bus and register built-in handlers. Nothing listens yet.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let bus = EventBus::new(config.bus.clone()).context("failed to build event bus")?;

        let handles = handlers::register_builtin_handlers(&bus);
        info!(
            subscriptions = handles.len(),
            source = %bus.source_service(),
            "Built-in handlers registered"
        );

        Ok(Self {
            gateway: GatewayService::with_bus(config, bus),
        })
    }

    pub fn bus(&self) -> &EventBus {
        self.gateway.bus()
    }

    /// Start the gateway; returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = self
            .gateway
            .start()
            .await
            .context("failed to start gateway")?;
        info!(addr = %addr, "Node started");
        Ok(addr)
    }

    /// Refuse new events, cancel pending retries, then stop serving.
    pub async fn shutdown(&mut self) {
        info!("Shutting down node...");
        self.gateway.shutdown().await;
        info!("Node stopped");
    }
}
