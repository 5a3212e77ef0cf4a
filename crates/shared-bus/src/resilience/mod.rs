//! Failure isolation for deliveries: circuit breakers and retry policy.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, CircuitStats, CircuitTransition,
};
pub use retry::{BackoffProfile, RetryConfig, RetryPolicy};
