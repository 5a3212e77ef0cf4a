use super::json_body;
use crate::error::{ApiError, ApiResult};
use crate::router::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use shared_bus::{CorrelationId, EventName};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub event_name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishAccepted {
    pub correlation_id: CorrelationId,
    /// Subscribers the event was fanned out to
    pub subscribers: usize,
}

/// `POST /api/events`
///
/// Accepts the event and returns once deliveries are scheduled; outcomes
/// show up in the metrics, not in this response.
pub async fn publish(
    State(state): State<AppState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PublishAccepted>)> {
    let request = json_body(body)?;
    let event_name: EventName = request
        .event_name
        .parse()
        .map_err(|_| ApiError::unknown_event(&request.event_name))?;

    let pending = state.bus.dispatch(event_name, request.payload)?;
    info!(
        correlation_id = %pending.correlation_id(),
        event = %event_name,
        subscribers = pending.subscribers(),
        "Event accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishAccepted {
            correlation_id: pending.correlation_id(),
            subscribers: pending.subscribers(),
        }),
    ))
}
