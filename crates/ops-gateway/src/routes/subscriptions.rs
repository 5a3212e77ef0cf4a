use super::json_body;
use crate::error::{ApiError, ApiResult};
use crate::router::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use shared_bus::{Destination, EventName, SubscriptionHandle, SubscriptionId};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub event_name: String,
    pub url: String,
}

/// `POST /api/subscriptions`: register an HTTP destination.
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<SubscribeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubscriptionHandle>)> {
    let request = json_body(body)?;
    let event_name: EventName = request
        .event_name
        .parse()
        .map_err(|_| ApiError::unknown_event(&request.event_name))?;

    if !(request.url.starts_with("http://") || request.url.starts_with("https://")) {
        return Err(ApiError::invalid_request(format!(
            "url must be http or https: {}",
            request.url
        )));
    }

    let handle = state
        .bus
        .subscribe(event_name, Destination::http(request.url));
    info!(
        subscription = %handle.id,
        event = %event_name,
        destination = %handle.destination,
        "HTTP subscription registered"
    );
    Ok((StatusCode::CREATED, Json(handle)))
}

/// `GET /api/subscriptions`
pub async fn list(State(state): State<AppState>) -> Json<Vec<SubscriptionHandle>> {
    Json(state.bus.subscriptions())
}

/// `DELETE /api/subscriptions/:id`
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    match state.bus.unsubscribe_by_id(SubscriptionId::new(id)) {
        Some(handle) => {
            info!(subscription = %handle.id, "Subscription removed");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::not_found(format!("subscription {} not found", id))),
    }
}
