//! Per-destination circuit breakers.
//!
//! Keeps a persistently failing destination from soaking up delivery work
//! and retry budget.
//!
//! # Circuit Breaker States
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    CIRCUIT BREAKER STATE MACHINE                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │                         probe fails                                 │
//! │                  ┌──────────────────────────┐                       │
//! │                  ▼                          │                       │
//! │      ┌──────────┐          ┌──────────┐          ┌──────────┐       │
//! │      │  CLOSED  │ ───────► │   OPEN   │ ───────► │HALF-OPEN │       │
//! │      │ (normal) │ failures │ (reject) │  timeout │ (1 probe)│       │
//! │      └──────────┘          └──────────┘          └──────────┘       │
//! │            ▲                                           │            │
//! │            └───────────────────────────────────────────┘            │
//! │                         probe succeeds                              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each destination owns its own mutex. The registry map is only locked long
//! enough to look up or insert an entry, so unrelated destinations never
//! contend with each other.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// Reset timeout elapsed - a single probe request is admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a probe
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Initial value of the `circuitBreakerEnabled` flag
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            enabled: true,
        }
    }
}

/// A state change, reported so the bus can announce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitTransition {
    pub destination: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub failure_count: u32,
}

/// Breaker state for one destination
struct DestinationCircuit {
    state: CircuitState,
    /// Consecutive failures since the last success
    failure_count: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    /// Set while the half-open probe is outstanding
    probe_in_flight: bool,
    last_transition: Instant,
    total_requests: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl DestinationCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            opened_at: None,
            probe_in_flight: false,
            last_transition: Instant::now(),
            total_requests: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn transition(&mut self, destination: &str, to: CircuitState) -> CircuitTransition {
        let from = self.state;
        self.state = to;
        self.last_transition = Instant::now();
        CircuitTransition {
            destination: destination.to_string(),
            from,
            to,
            failure_count: self.failure_count,
        }
    }
}

/// Registry of circuit breakers keyed by destination.
///
/// Circuits are created lazily on first use and live as long as the
/// registry.
pub struct CircuitBreakerRegistry {
    circuits: DashMap<String, Arc<Mutex<DestinationCircuit>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn circuit(&self, destination: &str) -> Arc<Mutex<DestinationCircuit>> {
        if let Some(existing) = self.circuits.get(destination) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .circuits
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DestinationCircuit::new())));
        Arc::clone(entry.value())
    }

    /// Check whether a delivery to the destination may proceed.
    ///
    /// Returns `false` while the circuit is open and the reset timeout has
    /// not elapsed, and while a half-open probe is already outstanding.
    pub fn allow_request(&self, destination: &str) -> bool {
        let circuit = self.circuit(destination);
        let mut circuit = circuit.lock();
        circuit.total_requests += 1;

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let Some(opened_at) = circuit.opened_at else {
                    // Open without a timestamp cannot be produced by
                    // record_failure; admit rather than wedge.
                    return true;
                };
                if opened_at.elapsed() >= self.config.reset_timeout {
                    info!(
                        destination = destination,
                        "Circuit breaker transitioning to half-open"
                    );
                    circuit.transition(destination, CircuitState::HalfOpen);
                    circuit.probe_in_flight = true;
                    true
                } else {
                    circuit.total_rejections += 1;
                    debug!(
                        destination = destination,
                        remaining_ms = self
                            .config
                            .reset_timeout
                            .saturating_sub(opened_at.elapsed())
                            .as_millis() as u64,
                        "Circuit breaker is open, rejecting request"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    circuit.total_rejections += 1;
                    debug!(
                        destination = destination,
                        "Half-open probe outstanding, rejecting request"
                    );
                    false
                } else {
                    circuit.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful delivery.
    ///
    /// Resets the failure count; a successful half-open probe closes the
    /// circuit.
    pub fn record_success(&self, destination: &str) -> Option<CircuitTransition> {
        let circuit = self.circuit(destination);
        let mut circuit = circuit.lock();
        circuit.failure_count = 0;

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.probe_in_flight = false;
                circuit.opened_at = None;
                info!(
                    destination = destination,
                    "Circuit breaker closing after successful probe"
                );
                Some(circuit.transition(destination, CircuitState::Closed))
            }
            CircuitState::Closed | CircuitState::Open => None,
        }
    }

    /// Record a failed delivery.
    ///
    /// Opens the circuit once the failure count reaches the threshold; a
    /// failed half-open probe reopens it immediately.
    pub fn record_failure(&self, destination: &str) -> Option<CircuitTransition> {
        let circuit = self.circuit(destination);
        let mut circuit = circuit.lock();
        let now = Instant::now();
        circuit.total_failures += 1;
        circuit.failure_count = circuit.failure_count.saturating_add(1);
        circuit.last_failure_time = Some(now);

        match circuit.state {
            CircuitState::Closed if circuit.failure_count >= self.config.failure_threshold => {
                warn!(
                    destination = destination,
                    failures = circuit.failure_count,
                    threshold = self.config.failure_threshold,
                    reset_timeout_ms = self.config.reset_timeout.as_millis(),
                    "Circuit breaker opening due to failures"
                );
                circuit.opened_at = Some(now);
                Some(circuit.transition(destination, CircuitState::Open))
            }
            CircuitState::Closed => None,
            CircuitState::HalfOpen => {
                warn!(
                    destination = destination,
                    "Circuit breaker reopening after probe failure"
                );
                circuit.probe_in_flight = false;
                circuit.opened_at = Some(now);
                Some(circuit.transition(destination, CircuitState::Open))
            }
            // Straggler admitted before the circuit opened.
            CircuitState::Open => None,
        }
    }

    /// Get the current state of a destination's circuit breaker
    pub fn state(&self, destination: &str) -> CircuitState {
        self.circuits
            .get(destination)
            .map(|c| c.value().lock().state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failures currently counted for a destination
    pub fn failure_count(&self, destination: &str) -> u32 {
        self.circuits
            .get(destination)
            .map(|c| c.value().lock().failure_count)
            .unwrap_or(0)
    }

    /// Number of destinations whose circuit is open
    pub fn open_count(&self) -> usize {
        self.circuits
            .iter()
            .filter(|entry| entry.value().lock().state == CircuitState::Open)
            .count()
    }

    /// Get statistics for all circuits, ordered by destination
    pub fn stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self
            .circuits
            .iter()
            .map(|entry| {
                let circuit = entry.value().lock();
                CircuitStats {
                    destination: entry.key().clone(),
                    state: circuit.state,
                    failure_count: circuit.failure_count,
                    total_requests: circuit.total_requests,
                    total_failures: circuit.total_failures,
                    total_rejections: circuit.total_rejections,
                    time_in_state_ms: circuit.last_transition.elapsed().as_millis() as u64,
                    last_failure_ms_ago: circuit
                        .last_failure_time
                        .map(|t| t.elapsed().as_millis() as u64),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.destination.cmp(&b.destination));
        stats
    }

    /// Reset a specific circuit (for admin purposes)
    pub fn reset(&self, destination: &str) -> bool {
        let Some(entry) = self.circuits.get(destination) else {
            return false;
        };
        let mut circuit = entry.value().lock();
        info!(destination = destination, "Circuit breaker manually reset");
        Self::reset_circuit(&mut circuit);
        true
    }

    /// Reset all circuits
    pub fn reset_all(&self) {
        for entry in self.circuits.iter() {
            let mut circuit = entry.value().lock();
            info!(destination = %entry.key(), "Circuit breaker manually reset");
            Self::reset_circuit(&mut circuit);
        }
    }

    /// Forget a destination that no longer exists, e.g. a disconnected
    /// WebSocket client.
    pub fn remove(&self, destination: &str) -> bool {
        self.circuits.remove(destination).is_some()
    }

    fn reset_circuit(circuit: &mut DestinationCircuit) {
        circuit.state = CircuitState::Closed;
        circuit.failure_count = 0;
        circuit.opened_at = None;
        circuit.probe_in_flight = false;
        circuit.last_transition = Instant::now();
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Statistics for a circuit breaker
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub destination: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub time_in_state_ms: u64,
    pub last_failure_ms_ago: Option<u64>,
}
