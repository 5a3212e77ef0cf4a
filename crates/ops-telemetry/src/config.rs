//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging, tracing and metrics export.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces and logs
    pub service_name: String,

    /// Export spans over OTLP
    pub otlp_enabled: bool,

    /// OpenTelemetry OTLP gRPC endpoint
    pub otlp_endpoint: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Deployment environment (development, staging, production)
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "ops-event-bus".to_string(),
            otlp_enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            environment: "development".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: Service name (default: ops-event-bus)
    /// - `OPS_OTLP_ENABLED`: Export traces over OTLP (default: false)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
    /// - `OPS_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `OPS_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `OPS_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `OPS_ENVIRONMENT`: Deployment environment (default: development)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "ops-event-bus".to_string()),

            otlp_enabled: env::var("OPS_OTLP_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),

            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),

            log_level: env::var("OPS_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("OPS_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("OPS_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            environment: env::var("OPS_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Override the service name, keeping everything else from `self`.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
