//! # Delivery Channels
//!
//! Uniform delivery abstraction. Each subscription owns one channel; the
//! dispatcher drives every channel through the same retry loop, and through
//! the breaker gate of its destination key unless the channel breaks its
//! fan-out into per-destination circuits itself.
//!
//! | Channel | Breaker key | Failure |
//! |---------|-------------|---------|
//! | [`LocalChannel`] | `local:<handler_id>` | handler error or panic |
//! | [`HttpChannel`] | `http:<url>` | non-2xx status or network error |
//! | [`WebSocketChannel`] | `websocket:<client_id>`, one per socket | no targeted socket reached |

pub mod http;
pub mod local;
pub mod websocket;

use crate::envelope::EventEnvelope;
use crate::error::DeliveryError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub use http::HttpChannel;
pub use local::{handler_fn, EventHandler, LocalChannel, TypedHandler};
pub use websocket::{
    BroadcastReport, ClientBreakers, ClientId, TransitionHook, WebSocketChannel, WebSocketHub,
};

/// Transport used to reach a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Local,
    Http,
    #[serde(rename = "websocket")]
    WebSocket,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Http => write!(f, "http"),
            Self::WebSocket => write!(f, "websocket"),
        }
    }
}

/// A way of handing an envelope to one destination.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Key the circuit breaker and metrics track this destination under.
    fn destination_key(&self) -> &str;

    /// Whether the dispatcher gates deliveries on the circuit of
    /// [`destination_key`](Self::destination_key).
    fn uses_destination_breaker(&self) -> bool {
        true
    }

    /// Make one delivery attempt. Retrying is the caller's business.
    async fn deliver(&self, envelope: &Arc<EventEnvelope>) -> Result<(), DeliveryError>;
}
