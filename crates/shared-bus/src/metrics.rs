//! Delivery metrics.
//!
//! Lifetime counters are plain atomics. The success rate and average latency
//! are computed over a bounded window of recent attempts; once the window is
//! full the oldest record is dropped.

use crate::channels::{ChannelKind, WebSocketHub};
use crate::envelope::CorrelationId;
use crate::error::DeliveryErrorKind;
use crate::events::EventName;
use crate::resilience::CircuitBreakerRegistry;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure(DeliveryErrorKind),
    /// Blocked by an open circuit; the destination was not contacted.
    CircuitOpen,
}

/// One delivery attempt, as recorded by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttemptRecord {
    pub correlation_id: CorrelationId,
    pub event_name: EventName,
    pub channel: ChannelKind,
    pub destination: String,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    /// 1-based
    pub attempt_number: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Dashboard view of the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Envelopes published
    pub event_count: u64,
    /// Delivery attempts, including retries and circuit-open rejections
    pub delivery_count: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    /// Successful share of the recent window, `1.0` when empty
    pub success_rate: f64,
    /// Mean latency in ms over recent attempts that reached a destination
    pub avg_latency: f64,
    pub active_circuit_breakers: usize,
    pub connected_clients: usize,
    pub circuit_open_rejections: u64,
    pub retries: u64,
}

/// Aggregates delivery outcomes for the dashboard and the Prometheus export.
pub struct MetricsAggregator {
    events_published: AtomicU64,
    deliveries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    circuit_open_rejections: AtomicU64,
    retries: AtomicU64,
    window: Mutex<VecDeque<DeliveryAttemptRecord>>,
    window_size: usize,
}

impl MetricsAggregator {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            events_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            circuit_open_rejections: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            window: Mutex::new(VecDeque::with_capacity(window_size)),
            window_size,
        }
    }

    /// Record a published envelope
    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a scheduled retry
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivery attempt
    pub fn record_delivery(&self, record: DeliveryAttemptRecord) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        match record.outcome {
            AttemptOutcome::Success => self.successes.fetch_add(1, Ordering::Relaxed),
            AttemptOutcome::Failure(_) => self.failures.fetch_add(1, Ordering::Relaxed),
            AttemptOutcome::CircuitOpen => {
                self.circuit_open_rejections.fetch_add(1, Ordering::Relaxed)
            }
        };

        let mut window = self.window.lock();
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(record);
    }

    /// Most recent attempts, newest first
    pub fn recent_attempts(&self, limit: usize) -> Vec<DeliveryAttemptRecord> {
        self.window.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Successful share of the recent window
    pub fn success_rate(&self) -> f64 {
        let window = self.window.lock();
        if window.is_empty() {
            return 1.0;
        }
        let successes = window
            .iter()
            .filter(|r| r.outcome == AttemptOutcome::Success)
            .count();
        successes as f64 / window.len() as f64
    }

    /// Mean latency in ms over recent attempts that reached a destination
    pub fn average_latency_ms(&self) -> f64 {
        let window = self.window.lock();
        let (total, count) = window
            .iter()
            .filter(|r| r.outcome != AttemptOutcome::CircuitOpen)
            .fold((0u64, 0u64), |(total, count), r| {
                (total + r.latency_ms, count + 1)
            });
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    pub fn snapshot(
        &self,
        breakers: &CircuitBreakerRegistry,
        hub: &WebSocketHub,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            event_count: self.events_published.load(Ordering::Relaxed),
            delivery_count: self.deliveries.load(Ordering::Relaxed),
            successful_deliveries: self.successes.load(Ordering::Relaxed),
            failed_deliveries: self.failures.load(Ordering::Relaxed),
            success_rate: self.success_rate(),
            avg_latency: self.average_latency_ms(),
            active_circuit_breakers: breakers.open_count(),
            connected_clients: hub.connected_clients(),
            circuit_open_rejections: self.circuit_open_rejections.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(1024)
    }
}
