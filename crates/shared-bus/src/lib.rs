//! # Shared Bus - Event Bus for the Operations Platform
//!
//! Distributes domain events (bookings, locations, kits, staffing, expenses)
//! to in-process handlers, other services over HTTP and browser clients over
//! WebSocket, with every destination isolated behind its own circuit breaker.
//!
//! ## Delivery Pipeline
//!
//! ```text
//!                   ┌──────────────┐
//!   publish() ────► │  Event Bus   │ ── one task per subscriber
//!                   └──────┬───────┘
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!   ┌────────────┐  ┌────────────┐   ┌────────────┐
//!   │  breaker   │  │  breaker   │   │  breaker   │
//!   │ local:audit│  │ http:<url> │   │ websocket  │
//!   └─────┬──────┘  └─────┬──────┘   └─────┬──────┘
//!         ▼               ▼                ▼
//!     handler()       POST JSON      push to clients
//!         └────── retry with backoff + jitter ──────┘
//! ```
//!
//! ## Guarantees
//!
//! - Every registered subscriber gets exactly one attempt sequence per
//!   publish, whatever the other subscribers do.
//! - A destination that fails `failure_threshold` times in a row is cut off
//!   until `reset_timeout` passes, then probed once.
//! - Only transient failures are retried; critical events retry sooner and
//!   more often than routine ones.
//! - Publishing never fails because of a subscriber.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod events;
pub mod features;
pub mod metrics;
pub mod payloads;
pub mod publisher;
pub mod resilience;
pub mod subscriber;

pub use channels::{
    handler_fn, ChannelKind, ClientId, DeliveryChannel, EventHandler, TypedHandler, WebSocketHub,
};
pub use config::{BusConfig, ConfigError, HttpChannelConfig, WebSocketChannelConfig};
pub use dispatch::{DeliveryOutcome, DispatchResult, PendingDispatch, SubscriberOutcome};
pub use envelope::{CorrelationId, EnvelopeMetadata, EventEnvelope};
pub use error::{BusError, DeliveryError, DeliveryErrorKind, HandlerError};
pub use events::{Criticality, EventName, TypedEvent, UnknownEventName};
pub use features::{Feature, FeatureFlags, FeatureSnapshot, UnknownFeature};
pub use metrics::{AttemptOutcome, DeliveryAttemptRecord, MetricsAggregator, MetricsSnapshot};
pub use publisher::{EventBus, EventBusBuilder};
pub use resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, CircuitStats, RetryConfig,
    RetryPolicy,
};
pub use subscriber::{Destination, SubscriptionHandle, SubscriptionId};
