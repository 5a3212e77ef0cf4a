use crate::error::{ApiError, ApiResult};
use crate::router::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_bus::{DeliveryAttemptRecord, MetricsSnapshot};

#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    /// Also return this many of the latest delivery attempts
    pub recent: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    /// Newest first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_attempts: Option<Vec<DeliveryAttemptRecord>>,
}

/// `GET /api/metrics[?recent=N]`
pub async fn snapshot(
    State(state): State<AppState>,
    query: Result<Query<MetricsQuery>, QueryRejection>,
) -> ApiResult<Json<MetricsResponse>> {
    let Query(query) = query.map_err(|rejection| ApiError::invalid_request(rejection.body_text()))?;
    Ok(Json(MetricsResponse {
        snapshot: state.bus.metrics_snapshot(),
        recent_attempts: query
            .recent
            .map(|limit| state.bus.metrics().recent_attempts(limit)),
    }))
}

/// `GET /metrics`: Prometheus text exposition
pub async fn prometheus(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = ops_telemetry::render(&state.bus.metrics_snapshot())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
