//! # Node Configuration
//!
//! Layering, lowest first:
//!
//! 1. Built-in defaults
//! 2. JSON file named by `OPS_CONFIG`
//! 3. `OPS_HTTP_PORT`, `OPS_SOURCE_SERVICE`

use anyhow::{Context, Result};
use ops_gateway::GatewayConfig;
use tracing::{info, warn};

/// Load configuration from the process environment.
pub fn load_config() -> Result<GatewayConfig> {
    load_from(|key| std::env::var(key).ok())
}

/// Load configuration reading variables through `var`.
pub fn load_from(var: impl Fn(&str) -> Option<String>) -> Result<GatewayConfig> {
    let mut config = match var("OPS_CONFIG") {
        Some(path) => {
            info!(path = %path, "Loading configuration file");
            GatewayConfig::from_json_file(&path)
                .with_context(|| format!("failed to load config from {}", path))?
        }
        None => GatewayConfig::default(),
    };

    if let Some(port) = var("OPS_HTTP_PORT") {
        match port.parse() {
            Ok(p) => config.http.port = p,
            Err(_) => warn!(value = %port, "OPS_HTTP_PORT is not a port number, ignoring"),
        }
    }

    if let Some(service) = var("OPS_SOURCE_SERVICE") {
        config.bus.source_service = service;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}
