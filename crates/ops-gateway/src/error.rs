//! Error types for the gateway.
//!
//! `ApiError` is what handlers return; it renders as
//! `{ "error": { "code": ..., "message": ... } }` with a matching status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use shared_bus::{BusError, UnknownEventName, UnknownFeature};
use std::fmt;

/// Error returned to HTTP clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status
    pub status: StatusCode,
    /// Stable machine-readable code
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// Malformed or semantically invalid request body (400)
    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", details)
    }

    /// Unknown event name (400)
    pub fn unknown_event(name: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "unknown_event",
            format!("unknown event name: {}", name),
        )
    }

    /// Resource not found (404)
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", resource)
    }

    /// Bus no longer accepts work (503)
    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", details)
    }

    /// Internal error (500)
    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", details)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: &self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<BusError> for ApiError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::ShuttingDown => Self::unavailable(e.to_string()),
            BusError::Serialization(_) => Self::invalid_request(e.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<UnknownEventName> for ApiError {
    fn from(e: UnknownEventName) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "unknown_event", e.to_string())
    }
}

impl From<UnknownFeature> for ApiError {
    fn from(e: UnknownFeature) -> Self {
        Self::not_found(e.to_string())
    }
}

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Gateway-level errors (startup and lifecycle)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Event bus could not be built
    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Server already started
    #[error("gateway already running")]
    AlreadyRunning,

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_shutting_down_maps_to_503() {
        let err: ApiError = BusError::ShuttingDown.into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_unknown_feature_maps_to_404() {
        let err: ApiError = UnknownFeature("warpDrive".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(err.message.contains("warpDrive"));
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::unknown_event("NOPE").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "unknown_event");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("NOPE"));
    }
}
