//! Error taxonomy for event delivery.
//!
//! | Error | Kind | Retried | Counts against breaker |
//! |-------|------|---------|------------------------|
//! | [`DeliveryError::CircuitOpen`] | `circuit_open` | No | No |
//! | [`DeliveryError::Transient`] | `transient` | Yes | Yes |
//! | [`DeliveryError::Permanent`] | `permanent` | No | Yes |
//! | [`DeliveryError::Handler`] | `handler` | Only if marked retryable | Yes |
//!
//! None of these ever reach the publisher: they are classified, recorded
//! and reported in the [`DispatchResult`](crate::DispatchResult).

use serde::Serialize;
use thiserror::Error;

/// Classification of a delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    CircuitOpen,
    Transient,
    Permanent,
    Handler,
}

/// Failure of a single delivery attempt to one destination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Request blocked by an open circuit; delivery was not attempted.
    #[error("circuit open for destination {destination}")]
    CircuitOpen { destination: String },

    /// Timeout, connection failure, 5xx-equivalent.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Malformed payload or destination rejected the event.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    /// A local handler returned an error or panicked.
    #[error("handler failed: {message}")]
    Handler { message: String, retryable: bool },
}

impl DeliveryError {
    pub fn kind(&self) -> DeliveryErrorKind {
        match self {
            Self::CircuitOpen { .. } => DeliveryErrorKind::CircuitOpen,
            Self::Transient(_) => DeliveryErrorKind::Transient,
            Self::Permanent(_) => DeliveryErrorKind::Permanent,
            Self::Handler { .. } => DeliveryErrorKind::Handler,
        }
    }

    /// The kind the retry policy should judge this error by.
    ///
    /// Retryable handler errors behave like transient failures.
    pub fn retry_class(&self) -> DeliveryErrorKind {
        match self {
            Self::Handler {
                retryable: true, ..
            } => DeliveryErrorKind::Transient,
            other => other.kind(),
        }
    }

    /// Blocked requests never reached the destination.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(self, Self::CircuitOpen { .. })
    }
}

/// Error returned by local event handlers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler failed and retrying will not help.
    #[error("{0}")]
    Failed(String),

    /// The handler failed on something that may clear up (lock contention,
    /// downstream hiccup).
    #[error("{0}")]
    Retryable(String),

    /// The payload did not have the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }
}

impl From<HandlerError> for DeliveryError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Failed(message) => DeliveryError::Handler {
                message,
                retryable: false,
            },
            HandlerError::Retryable(message) => DeliveryError::Handler {
                message,
                retryable: true,
            },
            HandlerError::MalformedPayload(message) => {
                DeliveryError::Permanent(format!("malformed payload: {}", message))
            }
        }
    }
}

/// Errors surfaced to publishers and bus owners.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been shut down and accepts no new publishes.
    #[error("event bus is shutting down")]
    ShuttingDown,

    /// A typed payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bus configuration rejected at construction.
    #[error("invalid bus configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The HTTP client for the HTTP channel could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
