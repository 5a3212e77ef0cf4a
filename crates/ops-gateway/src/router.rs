//! Axum router assembly.

use crate::config::GatewayConfig;
use crate::middleware::{create_cors_layer, track_metrics};
use crate::routes::{events, infrastructure, metrics, subscriptions};
use crate::ws::ws_handler;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use shared_bus::EventBus;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(bus: EventBus, config: GatewayConfig) -> Self {
        Self {
            bus,
            config: Arc::new(config),
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let limits = state.config.limits.clone();
    let cors = create_cors_layer(&state.config.cors);

    let api = Router::new()
        .route("/api/events", post(events::publish))
        .route(
            "/api/subscriptions",
            post(subscriptions::create).get(subscriptions::list),
        )
        .route("/api/subscriptions/:id", delete(subscriptions::remove))
        .route("/api/infrastructure/features", get(infrastructure::features))
        .route(
            "/api/infrastructure/features/:feature",
            post(infrastructure::toggle_feature),
        )
        .route(
            "/api/infrastructure/circuit-breakers",
            get(infrastructure::circuit_breakers),
        )
        .route(
            "/api/infrastructure/circuit-breakers/reset",
            post(infrastructure::reset_circuit_breakers),
        )
        .route("/api/metrics", get(metrics::snapshot))
        .route("/metrics", get(metrics::prometheus))
        .route("/health", get(metrics::health))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(limits.max_request_size))
                .layer(TimeoutLayer::new(limits.request_timeout)),
        );

    // The upgrade route stays outside the request timeout.
    Router::new()
        .merge(api)
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(track_metrics))
                .layer(cors),
        )
        .with_state(state)
}
