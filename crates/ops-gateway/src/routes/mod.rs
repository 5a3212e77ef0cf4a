//! HTTP handlers, grouped by resource.

pub mod events;
pub mod infrastructure;
pub mod metrics;
pub mod subscriptions;

use crate::error::ApiError;
use axum::extract::rejection::JsonRejection;
use axum::Json;

/// Unwrap a JSON body, turning extractor rejections into API errors.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::invalid_request(rejection.body_text()))
}
