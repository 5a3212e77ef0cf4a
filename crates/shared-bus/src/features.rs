//! Runtime feature toggles for the bus.
//!
//! Flags are read on every dispatch and every attempt, so flipping one
//! affects new work immediately while deliveries already running finish
//! under the setting they started with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// A toggleable bus feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    RetryEnabled,
    CircuitBreakerEnabled,
    WebsocketEnabled,
}

impl Feature {
    pub const ALL: [Feature; 3] = [
        Self::RetryEnabled,
        Self::CircuitBreakerEnabled,
        Self::WebsocketEnabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryEnabled => "retryEnabled",
            Self::CircuitBreakerEnabled => "circuitBreakerEnabled",
            Self::WebsocketEnabled => "websocketEnabled",
        }
    }

    fn snake_case(&self) -> &'static str {
        match self {
            Self::RetryEnabled => "retry_enabled",
            Self::CircuitBreakerEnabled => "circuit_breaker_enabled",
            Self::WebsocketEnabled => "websocket_enabled",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown feature: {0}")]
pub struct UnknownFeature(pub String);

impl FromStr for Feature {
    type Err = UnknownFeature;

    /// Accepts `retryEnabled` or `retry_enabled`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s || f.snake_case() == s)
            .ok_or_else(|| UnknownFeature(s.to_string()))
    }
}

/// Current value of every flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSnapshot {
    pub retry_enabled: bool,
    pub circuit_breaker_enabled: bool,
    pub websocket_enabled: bool,
}

/// Process-wide feature flags shared by the bus and the gateway.
#[derive(Debug)]
pub struct FeatureFlags {
    retry: AtomicBool,
    circuit_breaker: AtomicBool,
    websocket: AtomicBool,
}

impl FeatureFlags {
    pub fn new(retry: bool, circuit_breaker: bool, websocket: bool) -> Self {
        Self {
            retry: AtomicBool::new(retry),
            circuit_breaker: AtomicBool::new(circuit_breaker),
            websocket: AtomicBool::new(websocket),
        }
    }

    fn flag(&self, feature: Feature) -> &AtomicBool {
        match feature {
            Feature::RetryEnabled => &self.retry,
            Feature::CircuitBreakerEnabled => &self.circuit_breaker,
            Feature::WebsocketEnabled => &self.websocket,
        }
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.flag(feature).load(Ordering::Acquire)
    }

    /// Set a flag, returning its previous value.
    pub fn set(&self, feature: Feature, enabled: bool) -> bool {
        self.flag(feature).swap(enabled, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> FeatureSnapshot {
        FeatureSnapshot {
            retry_enabled: self.is_enabled(Feature::RetryEnabled),
            circuit_breaker_enabled: self.is_enabled(Feature::CircuitBreakerEnabled),
            websocket_enabled: self.is_enabled(Feature::WebsocketEnabled),
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feature_names() {
        assert_eq!(
            "retryEnabled".parse::<Feature>().unwrap(),
            Feature::RetryEnabled
        );
        assert_eq!(
            "circuit_breaker_enabled".parse::<Feature>().unwrap(),
            Feature::CircuitBreakerEnabled
        );
        assert!("metricsEnabled".parse::<Feature>().is_err());
    }

    #[test]
    fn test_set_returns_previous() {
        let flags = FeatureFlags::default();
        assert!(flags.set(Feature::WebsocketEnabled, false));
        assert!(!flags.is_enabled(Feature::WebsocketEnabled));
        assert!(!flags.set(Feature::WebsocketEnabled, true));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let flags = FeatureFlags::new(true, false, true);
        let json = serde_json::to_value(flags.snapshot()).unwrap();
        assert_eq!(json["retryEnabled"], true);
        assert_eq!(json["circuitBreakerEnabled"], false);
        assert_eq!(json["websocketEnabled"], true);
    }
}
