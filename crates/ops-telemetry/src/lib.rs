//! # Ops Telemetry
//!
//! Observability for the operations event bus.
//!
//! ## Components
//!
//! - **Logs**: `tracing` with pretty or JSON console output
//! - **Traces**: optional OTLP export through OpenTelemetry
//! - **Metrics**: Prometheus text exposition mirrored from the bus snapshot
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ops_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env())
//!         .await
//!         .expect("Failed to init telemetry");
//!     // Spans and logs are now collected until the guard drops.
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `ops-event-bus` | Service name in traces and logs |
//! | `OPS_OTLP_ENABLED` | `false` | Export traces over OTLP |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` | OTLP gRPC endpoint |
//! | `OPS_LOG_LEVEL` | `info` | Log level filter |
//! | `OPS_JSON_LOGS` | `false` | JSON log lines |

mod config;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{encode_metrics, observe_request, register_metrics, render};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging, tracing and the metrics registry.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes pending spans.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    let tracing_guard = tracing_setup::init_tracing(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
