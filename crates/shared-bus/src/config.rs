//! Bus configuration.

use crate::resilience::{BackoffProfile, CircuitBreakerConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Complete event bus configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Stamped on every envelope as `metadata.sourceService`
    pub source_service: String,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub http: HttpChannelConfig,
    pub websocket: WebSocketChannelConfig,
    /// Delivery attempts kept for the moving success rate and latency
    pub metrics_window: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            source_service: "ops-platform".to_string(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            http: HttpChannelConfig::default(),
            websocket: WebSocketChannelConfig::default(),
            metrics_window: 1024,
        }
    }
}

impl BusConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_service.trim().is_empty() {
            return Err(ConfigError::EmptySourceService);
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold);
        }
        if self.circuit_breaker.reset_timeout.is_zero() {
            return Err(ConfigError::InvalidResetTimeout);
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::InvalidJitter(self.retry.jitter));
        }
        validate_profile("routine", &self.retry.routine)?;
        validate_profile("critical", &self.retry.critical)?;
        if self.http.request_timeout.is_zero() {
            return Err(ConfigError::InvalidRequestTimeout);
        }
        if self.websocket.client_buffer == 0 {
            return Err(ConfigError::InvalidClientBuffer);
        }
        if self.metrics_window == 0 {
            return Err(ConfigError::InvalidMetricsWindow);
        }
        Ok(())
    }
}

fn validate_profile(name: &'static str, profile: &BackoffProfile) -> Result<(), ConfigError> {
    if profile.max_attempts == 0 {
        return Err(ConfigError::InvalidMaxAttempts(name));
    }
    if profile.base_delay > profile.max_delay {
        return Err(ConfigError::BaseDelayExceedsMax(name));
    }
    Ok(())
}

/// HTTP channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpChannelConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// WebSocket channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketChannelConfig {
    /// Initial value of the `websocketEnabled` flag
    pub enabled: bool,
    /// Envelopes queued per client before it counts as stalled
    pub client_buffer: usize,
}

impl Default for WebSocketChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_buffer: 256,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("source_service must not be empty")]
    EmptySourceService,

    #[error("circuit_breaker.failure_threshold must be > 0")]
    InvalidFailureThreshold,

    #[error("circuit_breaker.reset_timeout must be > 0")]
    InvalidResetTimeout,

    #[error("retry.jitter must be in [0, 1), got {0}")]
    InvalidJitter(f64),

    #[error("retry.{0}.max_attempts must be > 0")]
    InvalidMaxAttempts(&'static str),

    #[error("retry.{0}.base_delay must not exceed max_delay")]
    BaseDelayExceedsMax(&'static str),

    #[error("http.request_timeout must be > 0")]
    InvalidRequestTimeout,

    #[error("websocket.client_buffer must be > 0")]
    InvalidClientBuffer,

    #[error("metrics_window must be > 0")]
    InvalidMetricsWindow,
}
