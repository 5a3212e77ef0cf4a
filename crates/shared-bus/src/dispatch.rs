//! # Dispatch
//!
//! Fan-out of one envelope to its subscribers. Every subscriber gets its own
//! tokio task running the attempt loop:
//!
//! ```text
//! breaker gate ──► channel.deliver ──► record ──► retry? ──► sleep(backoff)
//!      │ open                             │ success / give up       │ shutdown
//!      ▼                                  ▼                         ▼
//!  CircuitOpen                        outcome                  outcome
//! ```
//!
//! A subscriber's failure never affects another subscriber's delivery, and
//! nothing here is surfaced to the publisher as an error. Channels that keep
//! a circuit per destination behind them (WebSocket) skip the gate and
//! report `CircuitOpen` themselves when every destination is cut off.

use crate::channels::ChannelKind;
use crate::envelope::{CorrelationId, EventEnvelope};
use crate::error::{DeliveryError, DeliveryErrorKind};
use crate::events::EventName;
use crate::features::Feature;
use crate::metrics::{AttemptOutcome, DeliveryAttemptRecord};
use crate::publisher::BusCore;
use crate::subscriber::{Subscription, SubscriptionId};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Final outcome of delivering one envelope to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    /// Gave up after a non-retryable error or after the last attempt.
    Failed {
        kind: DeliveryErrorKind,
        error: String,
    },
    /// The destination's circuit was open; nothing was sent.
    CircuitOpen,
    /// Not attempted, e.g. the channel is switched off.
    Skipped { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Per-subscriber entry of a [`DispatchResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberOutcome {
    pub subscription_id: SubscriptionId,
    pub destination: String,
    pub channel: ChannelKind,
    /// Delivery attempts made, including one rejected by an open circuit
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

/// Outcomes of every subscriber a publish reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub correlation_id: CorrelationId,
    pub event_name: EventName,
    pub outcomes: Vec<SubscriberOutcome>,
}

impl DispatchResult {
    /// Number of subscribers that received the event
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_delivered())
            .count()
    }

    /// True when every subscriber received the event (vacuously true with
    /// no subscribers)
    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(|o| o.outcome.is_delivered())
    }

    pub fn outcome_for(&self, destination: &str) -> Option<&SubscriberOutcome> {
        self.outcomes.iter().find(|o| o.destination == destination)
    }
}

struct SubscriberMeta {
    subscription_id: SubscriptionId,
    destination: String,
    channel: ChannelKind,
}

impl SubscriberMeta {
    fn of(subscription: &Subscription) -> Self {
        Self {
            subscription_id: subscription.handle().id,
            destination: subscription.destination_key().to_string(),
            channel: subscription.channel().kind(),
        }
    }

    fn outcome(self, attempts: u32, outcome: DeliveryOutcome) -> SubscriberOutcome {
        SubscriberOutcome {
            subscription_id: self.subscription_id,
            destination: self.destination,
            channel: self.channel,
            attempts,
            outcome,
        }
    }
}

enum PendingEntry {
    Ready(SubscriberOutcome),
    Running(SubscriberMeta, JoinHandle<SubscriberOutcome>),
}

/// Deliveries scheduled by a publish.
///
/// Deliveries run whether or not this is awaited; dropping it detaches
/// them.
pub struct PendingDispatch {
    correlation_id: CorrelationId,
    event_name: EventName,
    entries: Vec<PendingEntry>,
}

impl PendingDispatch {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn event_name(&self) -> EventName {
        self.event_name
    }

    /// Subscribers the envelope was routed to, skipped ones included
    pub fn subscribers(&self) -> usize {
        self.entries.len()
    }

    /// Wait for every delivery to finish.
    pub async fn wait(self) -> DispatchResult {
        let mut ready = Vec::with_capacity(self.entries.len());
        let mut metas = Vec::new();
        let mut handles = Vec::new();
        for entry in self.entries {
            match entry {
                PendingEntry::Ready(outcome) => ready.push(Some(outcome)),
                PendingEntry::Running(meta, handle) => {
                    ready.push(None);
                    metas.push(meta);
                    handles.push(handle);
                }
            }
        }

        let joined = futures::future::join_all(handles).await;
        let mut finished = metas.into_iter().zip(joined).map(|(meta, joined)| {
            joined.unwrap_or_else(|e| {
                meta.outcome(
                    0,
                    DeliveryOutcome::Failed {
                        kind: DeliveryErrorKind::Handler,
                        error: format!("delivery task aborted: {}", e),
                    },
                )
            })
        });

        let outcomes = ready
            .into_iter()
            .filter_map(|slot| slot.or_else(|| finished.next()))
            .collect();

        DispatchResult {
            correlation_id: self.correlation_id,
            event_name: self.event_name,
            outcomes,
        }
    }
}

/// Route an envelope to its current subscribers, one task each.
///
/// Must be called from within a tokio runtime.
pub(crate) fn spawn_dispatch(core: &Arc<BusCore>, envelope: Arc<EventEnvelope>) -> PendingDispatch {
    let event_name = envelope.event_name();
    let subscriptions = core.subscriptions.subscribers(event_name);
    core.metrics.record_published();

    let websocket_enabled = core.flags.is_enabled(Feature::WebsocketEnabled);
    let entries: Vec<PendingEntry> = subscriptions
        .into_iter()
        .map(|subscription| {
            let meta = SubscriberMeta::of(&subscription);
            if meta.channel == ChannelKind::WebSocket && !websocket_enabled {
                return PendingEntry::Ready(meta.outcome(
                    0,
                    DeliveryOutcome::Skipped {
                        reason: "websocket delivery disabled".to_string(),
                    },
                ));
            }
            let handle = tokio::spawn(deliver(
                Arc::clone(core),
                subscription,
                Arc::clone(&envelope),
            ));
            PendingEntry::Running(meta, handle)
        })
        .collect();

    debug!(
        correlation_id = %envelope.correlation_id(),
        event = %event_name,
        subscribers = entries.len(),
        "Event dispatched"
    );

    PendingDispatch {
        correlation_id: envelope.correlation_id(),
        event_name,
        entries,
    }
}

/// Attempt loop for one subscriber.
async fn deliver(
    core: Arc<BusCore>,
    subscription: Arc<Subscription>,
    envelope: Arc<EventEnvelope>,
) -> SubscriberOutcome {
    let meta = SubscriberMeta::of(&subscription);
    let key = subscription.destination_key();
    let channel = subscription.channel();
    let gated = channel.uses_destination_breaker();
    let criticality = envelope.criticality();
    let correlation_id = envelope.correlation_id();
    let mut shutdown = core.shutdown_signal();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        // Read once per attempt so a flag flip never strands a half-open probe.
        let breaker_enabled = gated && core.flags.is_enabled(Feature::CircuitBreakerEnabled);

        if breaker_enabled && !core.breakers.allow_request(key) {
            let error = DeliveryError::CircuitOpen {
                destination: key.to_string(),
            };
            return circuit_open(&core, meta, &envelope, attempt, &error);
        }

        let started = Instant::now();
        let result = channel.deliver(&envelope).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let error = match result {
            // Every destination behind the channel was cut off
            Err(error @ DeliveryError::CircuitOpen { .. }) => {
                return circuit_open(&core, meta, &envelope, attempt, &error);
            }
            Ok(()) => {
                core.metrics.record_delivery(record(
                    &meta,
                    &envelope,
                    AttemptOutcome::Success,
                    latency_ms,
                    attempt,
                ));
                if breaker_enabled {
                    if let Some(transition) = core.breakers.record_success(key) {
                        core.announce_transition(&transition, envelope.event_name());
                    }
                }
                debug!(%correlation_id, destination = %key, attempt, latency_ms, "Delivered");
                return meta.outcome(attempt, DeliveryOutcome::Delivered);
            }
            Err(error) => error,
        };

        core.metrics.record_delivery(record(
            &meta,
            &envelope,
            AttemptOutcome::Failure(error.kind()),
            latency_ms,
            attempt,
        ));
        if breaker_enabled && error.counts_against_breaker() {
            if let Some(transition) = core.breakers.record_failure(key) {
                core.announce_transition(&transition, envelope.event_name());
            }
        }

        let retry_enabled = core.flags.is_enabled(Feature::RetryEnabled);
        if !retry_enabled || !core.retry.should_retry(attempt, error.retry_class(), criticality) {
            warn!(
                %correlation_id,
                destination = %key,
                attempt,
                kind = ?error.kind(),
                error = %error,
                "Delivery failed"
            );
            return meta.outcome(attempt, failed(&error, None));
        }

        if core.is_shutting_down() {
            return meta.outcome(
                attempt,
                failed(&error, Some("retry abandoned on shutdown")),
            );
        }

        let delay = core.retry.next_delay(attempt, criticality);
        core.metrics.record_retry();
        info!(
            %correlation_id,
            destination = %key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying delivery"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_requested(&mut shutdown) => {
                return meta.outcome(
                    attempt,
                    failed(&error, Some("retry cancelled by shutdown")),
                );
            }
        }
    }
}

/// Record a delivery rejected by an open circuit. Terminal: rejections are
/// neither retried nor counted against the breaker.
fn circuit_open(
    core: &BusCore,
    meta: SubscriberMeta,
    envelope: &EventEnvelope,
    attempt: u32,
    error: &DeliveryError,
) -> SubscriberOutcome {
    core.metrics.record_delivery(record(
        &meta,
        envelope,
        AttemptOutcome::CircuitOpen,
        0,
        attempt,
    ));
    debug!(
        correlation_id = %envelope.correlation_id(),
        destination = %meta.destination,
        attempt,
        error = %error,
        "Delivery rejected"
    );
    meta.outcome(attempt, DeliveryOutcome::CircuitOpen)
}

/// Resolves once the bus starts shutting down.
async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

fn failed(error: &DeliveryError, note: Option<&str>) -> DeliveryOutcome {
    DeliveryOutcome::Failed {
        kind: error.kind(),
        error: match note {
            Some(note) => format!("{} ({})", error, note),
            None => error.to_string(),
        },
    }
}

fn record(
    meta: &SubscriberMeta,
    envelope: &EventEnvelope,
    outcome: AttemptOutcome,
    latency_ms: u64,
    attempt_number: u32,
) -> DeliveryAttemptRecord {
    DeliveryAttemptRecord {
        correlation_id: envelope.correlation_id(),
        event_name: envelope.event_name(),
        channel: meta.channel,
        destination: meta.destination.clone(),
        outcome,
        latency_ms,
        attempt_number,
        recorded_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(destination: &str, outcome: DeliveryOutcome) -> SubscriberOutcome {
        SubscriberOutcome {
            subscription_id: SubscriptionId::new(1),
            destination: destination.to_string(),
            channel: ChannelKind::Local,
            attempts: 1,
            outcome,
        }
    }

    #[test]
    fn test_dispatch_result_helpers() {
        let result = DispatchResult {
            correlation_id: CorrelationId::new(),
            event_name: EventName::KitCreated,
            outcomes: vec![
                outcome("local:a", DeliveryOutcome::Delivered),
                outcome("local:b", DeliveryOutcome::CircuitOpen),
            ],
        };
        assert_eq!(result.delivered(), 1);
        assert!(!result.all_delivered());
        assert_eq!(
            result.outcome_for("local:b").unwrap().outcome,
            DeliveryOutcome::CircuitOpen
        );
        assert!(result.outcome_for("local:c").is_none());
    }

    #[test]
    fn test_outcome_wire_format() {
        let json = serde_json::to_value(outcome(
            "http:x",
            DeliveryOutcome::Failed {
                kind: DeliveryErrorKind::Permanent,
                error: "destination responded 400 Bad Request".into(),
            },
        ))
        .unwrap();
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["kind"], "permanent");
        assert_eq!(json["subscriptionId"], 1);
    }
}
