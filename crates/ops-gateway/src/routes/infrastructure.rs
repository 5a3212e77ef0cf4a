//! Feature flags and circuit breaker administration.

use super::json_body;
use crate::error::ApiResult;
use crate::router::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use shared_bus::{CircuitStats, Feature, FeatureSnapshot};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub feature: Feature,
    pub enabled: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakersResponse {
    pub open_circuits: usize,
    pub circuits: Vec<CircuitStats>,
}

/// `GET /api/infrastructure/features`
pub async fn features(State(state): State<AppState>) -> Json<FeatureSnapshot> {
    Json(state.bus.feature_flags().snapshot())
}

/// `POST /api/infrastructure/features/:feature`
pub async fn toggle_feature(
    State(state): State<AppState>,
    Path(feature): Path<String>,
    body: Result<Json<ToggleRequest>, JsonRejection>,
) -> ApiResult<Json<ToggleResponse>> {
    let feature: Feature = feature.parse()?;
    let request = json_body(body)?;

    let previous = state.bus.feature_flags().set(feature, request.enabled);
    info!(
        feature = %feature.as_str(),
        previous,
        enabled = request.enabled,
        "Feature flag updated"
    );

    let message = format!(
        "{} {}",
        feature.as_str(),
        if request.enabled { "enabled" } else { "disabled" }
    );
    Ok(Json(ToggleResponse {
        feature,
        enabled: request.enabled,
        message,
    }))
}

/// `GET /api/infrastructure/circuit-breakers`
pub async fn circuit_breakers(State(state): State<AppState>) -> Json<CircuitBreakersResponse> {
    let breakers = state.bus.circuit_breakers();
    Json(CircuitBreakersResponse {
        open_circuits: breakers.open_count(),
        circuits: breakers.stats(),
    })
}

/// `POST /api/infrastructure/circuit-breakers/reset`
pub async fn reset_circuit_breakers(
    State(state): State<AppState>,
) -> Json<CircuitBreakersResponse> {
    let breakers = state.bus.circuit_breakers();
    breakers.reset_all();
    info!("All circuit breakers reset");
    Json(CircuitBreakersResponse {
        open_circuits: breakers.open_count(),
        circuits: breakers.stats(),
    })
}
