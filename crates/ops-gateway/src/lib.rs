//! # Ops Gateway
//!
//! HTTP and WebSocket surface for the operations event bus.
//!
//! ## Endpoints
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /api/events` | Publish an event (`202 Accepted`) |
//! | `GET/POST /api/subscriptions` | List or register HTTP destinations |
//! | `DELETE /api/subscriptions/:id` | Remove a subscription |
//! | `GET /api/infrastructure/features` | Current feature flags |
//! | `POST /api/infrastructure/features/:feature` | Toggle a feature flag |
//! | `GET /api/infrastructure/circuit-breakers` | Per-destination breaker stats |
//! | `POST /api/infrastructure/circuit-breakers/reset` | Close every circuit |
//! | `GET /api/metrics` | Bus metrics snapshot (JSON) |
//! | `GET /metrics` | Prometheus exposition |
//! | `GET /health` | Liveness |
//! | `GET /ws` | Live event stream |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         ops-gateway                          │
//! │  ┌──────────┐   ┌────────────┐   ┌──────────────────────┐   │
//! │  │   CORS   │──►│   Limits   │──►│  routes / ws handler │   │
//! │  │  Trace   │   │  Timeout   │   └──────────┬───────────┘   │
//! │  └──────────┘   └────────────┘              │               │
//! └─────────────────────────────────────────────┼───────────────┘
//!                                               ▼
//!                                     shared_bus::EventBus
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod service;
pub mod ws;

pub use config::{ConfigError, CorsConfig, GatewayConfig, HttpConfig, LimitsConfig, WebSocketConfig};
pub use error::{ApiError, ApiResult, GatewayError};
pub use router::{build_router, AppState};
pub use service::GatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
