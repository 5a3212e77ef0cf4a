//! Exponential backoff with jitter.
//!
//! The delay for attempt `n` (1-based) is `base * 2^(n-1)`, capped at the
//! profile's `max_delay`, then scaled by a uniform factor in
//! `[1 - jitter, 1 + jitter]` so subscribers failing together do not retry
//! in lockstep.

use crate::error::DeliveryErrorKind;
use crate::events::Criticality;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff parameters for one criticality level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffProfile {
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Total attempts including the first one
    pub max_attempts: u32,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Initial value of the `retryEnabled` flag
    pub enabled: bool,
    /// Relative jitter, `0.2` means ±20%
    pub jitter: f64,
    pub routine: BackoffProfile,
    pub critical: BackoffProfile,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jitter: 0.2,
            routine: BackoffProfile {
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                max_attempts: 3,
            },
            critical: BackoffProfile {
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(10),
                max_attempts: 6,
            },
        }
    }
}

/// Decides whether and when a failed delivery is attempted again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn profile(&self, criticality: Criticality) -> &BackoffProfile {
        match criticality {
            Criticality::Routine => &self.config.routine,
            Criticality::Critical => &self.config.critical,
        }
    }

    pub fn max_attempts(&self, criticality: Criticality) -> u32 {
        self.profile(criticality).max_attempts
    }

    /// Un-jittered delay before the attempt following `attempt`.
    pub fn base_delay(&self, attempt: u32, criticality: Criticality) -> Duration {
        let profile = self.profile(criticality);
        let exponent = attempt.saturating_sub(1).min(31);
        profile
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(profile.max_delay)
    }

    /// Lowest and highest delay `next_delay` can return for `attempt`.
    pub fn delay_bounds(&self, attempt: u32, criticality: Criticality) -> (Duration, Duration) {
        let base = self.base_delay(attempt, criticality);
        let jitter = self.config.jitter;
        (base.mul_f64(1.0 - jitter), base.mul_f64(1.0 + jitter))
    }

    /// Jittered delay before the attempt following `attempt`.
    pub fn next_delay(&self, attempt: u32, criticality: Criticality) -> Duration {
        let base = self.base_delay(attempt, criticality);
        let jitter = self.config.jitter;
        if jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(factor)
    }

    /// Only transient failures are retried, and only while attempts remain.
    pub fn should_retry(
        &self,
        attempt: u32,
        kind: DeliveryErrorKind,
        criticality: Criticality,
    ) -> bool {
        kind == DeliveryErrorKind::Transient && attempt < self.max_attempts(criticality)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
