//! Prometheus metrics for the event bus and its gateway.
//!
//! All metrics follow the naming convention: `ops_<component>_<metric>_<unit>`
//!
//! Bus figures are owned by the bus's `MetricsAggregator`; the gauges here
//! mirror its snapshot and are refreshed on every scrape.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use shared_bus::MetricsSnapshot;
use std::sync::Once;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // EVENT BUS
    // =========================================================================

    /// Envelopes published
    pub static ref BUS_EVENTS_PUBLISHED: IntGauge = IntGauge::new(
        "ops_bus_events_published",
        "Envelopes published since start"
    ).expect("metric creation failed");

    /// Delivery attempts by outcome
    pub static ref BUS_DELIVERIES: IntGauge = IntGauge::new(
        "ops_bus_delivery_attempts",
        "Delivery attempts since start, retries and circuit-open rejections included"
    ).expect("metric creation failed");

    pub static ref BUS_DELIVERIES_SUCCEEDED: IntGauge = IntGauge::new(
        "ops_bus_delivery_attempts_succeeded",
        "Delivery attempts that reached their destination"
    ).expect("metric creation failed");

    pub static ref BUS_DELIVERIES_FAILED: IntGauge = IntGauge::new(
        "ops_bus_delivery_attempts_failed",
        "Delivery attempts that failed at their destination"
    ).expect("metric creation failed");

    /// Circuit-open rejections
    pub static ref BUS_CIRCUIT_REJECTIONS: IntGauge = IntGauge::new(
        "ops_bus_circuit_open_rejections",
        "Deliveries blocked by an open circuit"
    ).expect("metric creation failed");

    pub static ref BUS_RETRIES: IntGauge = IntGauge::new(
        "ops_bus_retries",
        "Retries scheduled"
    ).expect("metric creation failed");

    /// Windowed success ratio
    pub static ref BUS_SUCCESS_RATE: Gauge = Gauge::new(
        "ops_bus_success_ratio",
        "Share of recent delivery attempts that succeeded"
    ).expect("metric creation failed");

    /// Windowed average latency
    pub static ref BUS_AVG_LATENCY: Gauge = Gauge::new(
        "ops_bus_delivery_latency_avg_milliseconds",
        "Mean latency of recent delivery attempts"
    ).expect("metric creation failed");

    /// Destinations currently cut off
    pub static ref BUS_OPEN_CIRCUITS: IntGauge = IntGauge::new(
        "ops_bus_open_circuits",
        "Destinations whose circuit breaker is open"
    ).expect("metric creation failed");

    pub static ref BUS_WEBSOCKET_CLIENTS: IntGauge = IntGauge::new(
        "ops_bus_websocket_clients",
        "Connected WebSocket clients"
    ).expect("metric creation failed");

    // =========================================================================
    // GATEWAY
    // =========================================================================

    /// HTTP requests served
    pub static ref GATEWAY_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("ops_gateway_requests_total", "HTTP requests served by the gateway"),
        &["method", "status"]
    ).expect("metric creation failed");

    /// HTTP request duration
    pub static ref GATEWAY_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "ops_gateway_request_duration_seconds",
            "Time spent serving HTTP requests"
        ).buckets(exponential_buckets(0.0005, 2.0, 14).expect("valid buckets")),
        &["method"]
    ).expect("metric creation failed");
}

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call repeatedly; registration happens once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let mut result = Ok(());
    REGISTER.call_once(|| {
        let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
            // Bus
            Box::new(BUS_EVENTS_PUBLISHED.clone()),
            Box::new(BUS_DELIVERIES.clone()),
            Box::new(BUS_DELIVERIES_SUCCEEDED.clone()),
            Box::new(BUS_DELIVERIES_FAILED.clone()),
            Box::new(BUS_CIRCUIT_REJECTIONS.clone()),
            Box::new(BUS_RETRIES.clone()),
            Box::new(BUS_SUCCESS_RATE.clone()),
            Box::new(BUS_AVG_LATENCY.clone()),
            Box::new(BUS_OPEN_CIRCUITS.clone()),
            Box::new(BUS_WEBSOCKET_CLIENTS.clone()),
            // Gateway
            Box::new(GATEWAY_REQUESTS.clone()),
            Box::new(GATEWAY_REQUEST_DURATION.clone()),
        ];

        for metric in metrics {
            if let Err(e) = REGISTRY.register(metric) {
                result = Err(TelemetryError::MetricsInit(e.to_string()));
                return;
            }
        }
    });
    result
}

/// Copy a bus snapshot into the gauges.
pub fn record_bus_snapshot(snapshot: &MetricsSnapshot) {
    BUS_EVENTS_PUBLISHED.set(clamp(snapshot.event_count));
    BUS_DELIVERIES.set(clamp(snapshot.delivery_count));
    BUS_DELIVERIES_SUCCEEDED.set(clamp(snapshot.successful_deliveries));
    BUS_DELIVERIES_FAILED.set(clamp(snapshot.failed_deliveries));
    BUS_CIRCUIT_REJECTIONS.set(clamp(snapshot.circuit_open_rejections));
    BUS_RETRIES.set(clamp(snapshot.retries));
    BUS_SUCCESS_RATE.set(snapshot.success_rate);
    BUS_AVG_LATENCY.set(snapshot.avg_latency);
    BUS_OPEN_CIRCUITS.set(snapshot.active_circuit_breakers as i64);
    BUS_WEBSOCKET_CLIENTS.set(snapshot.connected_clients as i64);
}

/// Count a served HTTP request.
pub fn observe_request(method: &str, status: u16, seconds: f64) {
    GATEWAY_REQUESTS
        .with_label_values(&[method, &status.to_string()])
        .inc();
    GATEWAY_REQUEST_DURATION
        .with_label_values(&[method])
        .observe(seconds);
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Refresh the bus gauges from `snapshot` and encode everything.
pub fn render(snapshot: &MetricsSnapshot) -> Result<String, TelemetryError> {
    register_metrics()?;
    record_bus_snapshot(snapshot);
    encode_metrics()
}
