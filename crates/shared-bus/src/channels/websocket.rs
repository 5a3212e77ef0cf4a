//! WebSocket fan-out.
//!
//! The hub only tracks per-client queues and event-name subscriptions; the
//! gateway owns the sockets and drains each client's queue into its socket.
//! Pushing never blocks the dispatcher: a client whose queue is full misses
//! the event, and a client whose queue is closed is evicted.
//!
//! Every connected client is its own destination. With [`ClientBreakers`]
//! attached, each client sits behind a circuit keyed
//! `websocket:<client_id>`, so a stalled socket is cut off without touching
//! the other sockets.

use super::{ChannelKind, DeliveryChannel};
use crate::envelope::EventEnvelope;
use crate::error::DeliveryError;
use crate::events::EventName;
use crate::features::{Feature, FeatureFlags};
use crate::resilience::{CircuitBreakerRegistry, CircuitTransition};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Destination key of WebSocket subscriptions.
pub const WEBSOCKET_DESTINATION: &str = "websocket";

/// Identifier of one connected WebSocket client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Key of this client's circuit breaker.
    pub fn destination_key(&self) -> String {
        format!("{}:{}", WEBSOCKET_DESTINATION, self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

struct ConnectedClient {
    sender: mpsc::Sender<Arc<EventEnvelope>>,
    subscriptions: HashSet<EventName>,
}

/// Result of pushing one envelope to every interested client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients subscribed to the event name
    pub targeted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Clients skipped because their circuit is open
    pub rejected: usize,
    /// Client circuits that changed state during the broadcast
    pub transitions: Vec<CircuitTransition>,
}

/// Registry of connected WebSocket clients.
pub struct WebSocketHub {
    clients: DashMap<ClientId, ConnectedClient>,
    next_id: AtomicU64,
    buffer: usize,
}

impl WebSocketHub {
    /// Create a hub whose per-client queues hold `buffer` envelopes.
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a client. The returned receiver yields every envelope the
    /// client subscribes to.
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<Arc<EventEnvelope>>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.clients.insert(
            id,
            ConnectedClient {
                sender,
                subscriptions: HashSet::new(),
            },
        );
        debug!(client = %id, "WebSocket client connected");
        (id, receiver)
    }
    /// Add event names to a client's subscriptions.
    ///
    /// Returns the client's full subscription set, or `None` if the client
    /// is no longer connected.
    pub fn subscribe(
        &self,
        id: ClientId,
        names: impl IntoIterator<Item = EventName>,
    ) -> Option<Vec<EventName>> {
        let mut client = self.clients.get_mut(&id)?;
        client.subscriptions.extend(names);
        Some(sorted(&client.subscriptions))
    }

    /// Remove event names from a client's subscriptions.
    pub fn unsubscribe(
        &self,
        id: ClientId,
        names: impl IntoIterator<Item = EventName>,
    ) -> Option<Vec<EventName>> {
        let mut client = self.clients.get_mut(&id)?;
        for name in names {
            client.subscriptions.remove(&name);
        }
        Some(sorted(&client.subscriptions))
    }

    pub fn disconnect(&self, id: ClientId) -> bool {
        let removed = self.clients.remove(&id).is_some();
        if removed {
            debug!(client = %id, "WebSocket client disconnected");
        }
        removed
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    /// Number of clients subscribed to `name`.
    pub fn subscribers_of(&self, name: EventName) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.subscriptions.contains(&name))
            .count()
    }

    /// Push an envelope to every client subscribed to its event name.
    pub fn broadcast(&self, envelope: &Arc<EventEnvelope>) -> BroadcastReport {
        self.broadcast_gated(envelope, None)
    }

    /// Push an envelope to every subscribed client whose circuit in
    /// `breakers` admits it, recording each write against that circuit.
    pub fn broadcast_gated(
        &self,
        envelope: &Arc<EventEnvelope>,
        breakers: Option<&CircuitBreakerRegistry>,
    ) -> BroadcastReport {
        let name = envelope.event_name();
        // Collect first; evicting while iterating would deadlock the shard.
        let targets: Vec<(ClientId, mpsc::Sender<Arc<EventEnvelope>>)> = self
            .clients
            .iter()
            .filter(|entry| entry.subscriptions.contains(&name))
            .map(|entry| (*entry.key(), entry.sender.clone()))
            .collect();

        let mut report = BroadcastReport {
            targeted: targets.len(),
            ..BroadcastReport::default()
        };

        for (id, sender) in targets {
            let key = id.destination_key();
            if let Some(registry) = breakers {
                if !registry.allow_request(&key) {
                    report.rejected += 1;
                    continue;
                }
            }

            let transition = match sender.try_send(Arc::clone(envelope)) {
                Ok(()) => {
                    report.delivered += 1;
                    breakers.and_then(|registry| registry.record_success(&key))
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = %id, event = %name, "WebSocket client queue full, event dropped");
                    report.failed += 1;
                    breakers.and_then(|registry| registry.record_failure(&key))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(client = %id, event = %name, "Evicting closed WebSocket client");
                    self.clients.remove(&id);
                    report.failed += 1;
                    if let Some(registry) = breakers {
                        registry.remove(&key);
                    }
                    None
                }
            };
            report.transitions.extend(transition);
        }

        report
    }
}

impl Default for WebSocketHub {
    fn default() -> Self {
        Self::new(256)
    }
}

fn sorted(set: &HashSet<EventName>) -> Vec<EventName> {
    let mut names: Vec<_> = set.iter().copied().collect();
    names.sort();
    names
}

/// Receives client circuit transitions together with the event that was
/// being delivered.
pub type TransitionHook = Arc<dyn Fn(&CircuitTransition, EventName) + Send + Sync>;

/// Per-client circuit breakers for a [`WebSocketChannel`].
#[derive(Clone)]
pub struct ClientBreakers {
    registry: Arc<CircuitBreakerRegistry>,
    flags: Arc<FeatureFlags>,
    on_transition: Option<TransitionHook>,
}

impl ClientBreakers {
    pub fn new(registry: Arc<CircuitBreakerRegistry>, flags: Arc<FeatureFlags>) -> Self {
        Self {
            registry,
            flags,
            on_transition: None,
        }
    }

    pub fn on_transition(mut self, hook: TransitionHook) -> Self {
        self.on_transition = Some(hook);
        self
    }

    /// The registry, while the circuit breaker feature is on
    fn active(&self) -> Option<&CircuitBreakerRegistry> {
        self.flags
            .is_enabled(Feature::CircuitBreakerEnabled)
            .then(|| self.registry.as_ref())
    }
}

/// Delivers through the [`WebSocketHub`].
///
/// No subscribed clients counts as success, as does reaching at least one
/// client. When nobody was reached the delivery fails permanently (a retry
/// would hit the same stalled queues), or reports the circuit open when
/// every client was cut off.
pub struct WebSocketChannel {
    hub: Arc<WebSocketHub>,
    breakers: Option<ClientBreakers>,
}

impl WebSocketChannel {
    pub fn new(hub: Arc<WebSocketHub>) -> Self {
        Self {
            hub,
            breakers: None,
        }
    }

    /// Gate every client behind its own circuit breaker.
    pub fn with_client_breakers(mut self, breakers: ClientBreakers) -> Self {
        self.breakers = Some(breakers);
        self
    }
}

#[async_trait]
impl DeliveryChannel for WebSocketChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WebSocket
    }

    fn destination_key(&self) -> &str {
        WEBSOCKET_DESTINATION
    }

    fn uses_destination_breaker(&self) -> bool {
        false
    }

    async fn deliver(&self, envelope: &Arc<EventEnvelope>) -> Result<(), DeliveryError> {
        let breakers = self.breakers.as_ref();
        let report = self
            .hub
            .broadcast_gated(envelope, breakers.and_then(ClientBreakers::active));

        if let Some(hook) = breakers.and_then(|b| b.on_transition.as_ref()) {
            for transition in &report.transitions {
                hook(transition, envelope.event_name());
            }
        }

        if report.targeted == 0 || report.delivered > 0 {
            if report.delivered < report.targeted {
                debug!(
                    delivered = report.delivered,
                    failed = report.failed,
                    rejected = report.rejected,
                    "Partial WebSocket broadcast"
                );
            }
            return Ok(());
        }
        if report.failed == 0 {
            return Err(DeliveryError::CircuitOpen {
                destination: WEBSOCKET_DESTINATION.to_string(),
            });
        }
        Err(DeliveryError::Permanent(format!(
            "no WebSocket client reached: {} failed, {} circuit open",
            report.failed, report.rejected
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn envelope(name: EventName) -> Arc<EventEnvelope> {
        Arc::new(EventEnvelope::new(name, serde_json::Value::Null, "test"))
    }

    fn breakers(threshold: u32) -> ClientBreakers {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(60),
            enabled: true,
        });
        ClientBreakers::new(Arc::new(registry), Arc::new(FeatureFlags::new(true, true, true)))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers_only() {
        let hub = WebSocketHub::new(8);
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        hub.subscribe(a, [EventName::KitCreated]);
        hub.subscribe(b, [EventName::BookingCreated]);

        let report = hub.broadcast(&envelope(EventName::KitCreated));
        assert_eq!(
            report,
            BroadcastReport {
                targeted: 1,
                delivered: 1,
                ..BroadcastReport::default()
            }
        );
        assert_eq!(
            rx_a.recv().await.unwrap().event_name(),
            EventName::KitCreated
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_clients_is_success() {
        let hub = Arc::new(WebSocketHub::new(8));
        let channel = WebSocketChannel::new(Arc::clone(&hub));
        channel
            .deliver(&envelope(EventName::LocationApproved))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_client_evicted() {
        let hub = Arc::new(WebSocketHub::new(8));
        let (dead, rx_dead) = hub.connect();
        let (live, mut rx_live) = hub.connect();
        hub.subscribe(dead, [EventName::KitCreated]);
        hub.subscribe(live, [EventName::KitCreated]);
        drop(rx_dead);

        let channel = WebSocketChannel::new(Arc::clone(&hub));
        channel.deliver(&envelope(EventName::KitCreated)).await.unwrap();

        assert_eq!(hub.connected_clients(), 1);
        assert!(rx_live.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_all_clients_failed_is_permanent() {
        let hub = Arc::new(WebSocketHub::new(1));
        let (id, _rx) = hub.connect();
        hub.subscribe(id, [EventName::KitCreated]);

        // Fill the single-slot queue so the next push fails.
        assert_eq!(hub.broadcast(&envelope(EventName::KitCreated)).delivered, 1);

        let channel = WebSocketChannel::new(Arc::clone(&hub));
        let err = channel
            .deliver(&envelope(EventName::KitCreated))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
        // A full queue drops the event but keeps the client
        assert_eq!(hub.connected_clients(), 1);
    }

    #[test]
    fn test_stalled_client_cut_off_alone() {
        let hub = WebSocketHub::new(1);
        let breakers = breakers(1);
        let registry = breakers.active().unwrap();
        let (stalled, _rx_stalled) = hub.connect();
        let (healthy, mut rx_healthy) = hub.connect();
        hub.subscribe(stalled, [EventName::KitCreated]);
        hub.subscribe(healthy, [EventName::KitCreated]);

        let first = hub.broadcast_gated(&envelope(EventName::KitCreated), Some(registry));
        assert_eq!(first.delivered, 2);
        rx_healthy.try_recv().unwrap();

        let second = hub.broadcast_gated(&envelope(EventName::KitCreated), Some(registry));
        assert_eq!((second.delivered, second.failed), (1, 1));
        assert_eq!(second.transitions.len(), 1);
        assert_eq!(second.transitions[0].destination, stalled.destination_key());
        assert_eq!(second.transitions[0].to, CircuitState::Open);
        rx_healthy.try_recv().unwrap();

        let third = hub.broadcast_gated(&envelope(EventName::KitCreated), Some(registry));
        assert_eq!((third.delivered, third.rejected), (1, 1));
        assert_eq!(registry.state(&healthy.destination_key()), CircuitState::Closed);
        assert_eq!(registry.open_count(), 1);
    }

    #[tokio::test]
    async fn test_every_client_cut_off_is_circuit_open() {
        let hub = Arc::new(WebSocketHub::new(1));
        let (id, _rx) = hub.connect();
        hub.subscribe(id, [EventName::KitCreated]);

        let announced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&announced);
        let channel = WebSocketChannel::new(Arc::clone(&hub)).with_client_breakers(
            breakers(1).on_transition(Arc::new(move |transition: &CircuitTransition, during: EventName| {
                assert_eq!(during, EventName::KitCreated);
                assert_eq!(transition.to, CircuitState::Open);
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        channel.deliver(&envelope(EventName::KitCreated)).await.unwrap();
        let err = channel
            .deliver(&envelope(EventName::KitCreated))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
        assert_eq!(announced.load(Ordering::SeqCst), 1);

        let err = channel
            .deliver(&envelope(EventName::KitCreated))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::CircuitOpen { .. }));
    }

    #[test]
    fn test_client_breakers_follow_feature_flag() {
        let breakers = breakers(1);
        assert!(breakers.active().is_some());
        breakers.flags.set(Feature::CircuitBreakerEnabled, false);
        assert!(breakers.active().is_none());
    }

    #[test]
    fn test_closed_client_forgets_circuit() {
        let hub = WebSocketHub::new(1);
        let breakers = breakers(1);
        let registry = breakers.active().unwrap();
        let (id, rx) = hub.connect();
        hub.subscribe(id, [EventName::KitCreated]);

        hub.broadcast_gated(&envelope(EventName::KitCreated), Some(registry));
        assert_eq!(registry.stats().len(), 1);

        drop(rx);
        let report = hub.broadcast_gated(&envelope(EventName::KitCreated), Some(registry));
        assert_eq!(report.failed, 1);
        assert!(registry.stats().is_empty());
        assert_eq!(hub.connected_clients(), 0);
    }

    #[test]
    fn test_client_destination_key() {
        let hub = WebSocketHub::default();
        let (id, _rx) = hub.connect();
        assert_eq!(id.destination_key(), format!("websocket:ws-{}", id.as_u64()));
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let hub = WebSocketHub::default();
        let (id, _rx) = hub.connect();

        let names = hub
            .subscribe(id, [EventName::KitCreated, EventName::BookingCreated])
            .unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(hub.subscribers_of(EventName::KitCreated), 1);

        let names = hub.unsubscribe(id, [EventName::KitCreated]).unwrap();
        assert_eq!(names, vec![EventName::BookingCreated]);
        assert_eq!(hub.subscribers_of(EventName::KitCreated), 0);

        assert!(hub.disconnect(id));
        assert!(hub.subscribe(id, [EventName::KitCreated]).is_none());
    }
}
