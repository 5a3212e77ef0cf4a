//! # Event Bus
//!
//! The publishing side of the bus and the owner of every shared component.
//!
//! ## Architecture
//!
//! - One [`EventBus`] per process, cloned freely (it is an `Arc` inside).
//! - Circuit breakers, feature flags, metrics and the WebSocket hub are
//!   injected (or defaulted) at construction; nothing is a global.
//! - `publish` waits for every subscriber's outcome, `dispatch` returns as
//!   soon as the deliveries are scheduled.
//!
//! ## Circuit-breaker notifications
//!
//! When a destination's breaker opens or closes (a WebSocket client counts
//! as a destination), the bus publishes
//! `CIRCUIT_BREAKER_OPENED` / `CIRCUIT_BREAKER_CLOSED` to its own
//! subscribers. Transitions caused while delivering a circuit-breaker event
//! are logged but not announced, so a failing listener cannot feed itself.

use crate::channels::{
    ClientBreakers, DeliveryChannel, EventHandler, HttpChannel, LocalChannel, TypedHandler,
    WebSocketChannel, WebSocketHub,
};
use crate::config::BusConfig;
use crate::dispatch::{spawn_dispatch, DispatchResult, PendingDispatch};
use crate::envelope::EventEnvelope;
use crate::error::{BusError, HandlerError};
use crate::events::{EventName, TypedEvent};
use crate::features::FeatureFlags;
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::payloads::{CircuitBreakerClosed, CircuitBreakerOpened};
use crate::resilience::{CircuitBreakerRegistry, CircuitState, CircuitTransition, RetryPolicy};
use crate::subscriber::{
    Destination, SubscriptionHandle, SubscriptionId, SubscriptionRegistry,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// State shared by the bus handle and every delivery task.
pub(crate) struct BusCore {
    pub(crate) config: BusConfig,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) breakers: Arc<CircuitBreakerRegistry>,
    pub(crate) retry: RetryPolicy,
    pub(crate) flags: Arc<FeatureFlags>,
    pub(crate) metrics: Arc<MetricsAggregator>,
    pub(crate) hub: Arc<WebSocketHub>,
    http_client: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl BusCore {
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Publish a breaker transition as an event, detached from the caller.
    pub(crate) fn announce_transition(
        self: &Arc<Self>,
        transition: &CircuitTransition,
        during: EventName,
    ) {
        if during.is_circuit_breaker_event() {
            info!(
                destination = %transition.destination,
                from = %transition.from,
                to = %transition.to,
                "Circuit transition while delivering a circuit-breaker event, not announced"
            );
            return;
        }
        if self.is_shutting_down() {
            return;
        }

        let source = self.config.source_service.as_str();
        let envelope = match transition.to {
            CircuitState::Open => EventEnvelope::typed(
                &CircuitBreakerOpened {
                    destination: transition.destination.clone(),
                    failure_count: transition.failure_count,
                },
                source,
            ),
            CircuitState::Closed => EventEnvelope::typed(
                &CircuitBreakerClosed {
                    destination: transition.destination.clone(),
                },
                source,
            ),
            CircuitState::HalfOpen => return,
        };

        match envelope {
            Ok(envelope) => {
                // Detached: the announcement must not hold up the delivery
                // that caused it.
                let _ = spawn_dispatch(self, Arc::new(envelope));
            }
            Err(e) => error!(error = %e, "Failed to build circuit-breaker event"),
        }
    }
}

/// Builder for [`EventBus`] with injectable shared components.
pub struct EventBusBuilder {
    config: BusConfig,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    flags: Option<Arc<FeatureFlags>>,
    metrics: Option<Arc<MetricsAggregator>>,
    hub: Option<Arc<WebSocketHub>>,
    http_client: Option<reqwest::Client>,
}

impl EventBusBuilder {
    pub fn circuit_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn feature_flags(mut self, flags: Arc<FeatureFlags>) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsAggregator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn websocket_hub(mut self, hub: Arc<WebSocketHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Validate the configuration and build the bus.
    pub fn build(self) -> Result<EventBus, BusError> {
        let config = self.config;
        config.validate()?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(config.http.request_timeout)
                .build()
                .map_err(|e| BusError::HttpClient(e.to_string()))?,
        };

        let breakers = self
            .breakers
            .unwrap_or_else(|| {
                Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()))
            });
        let flags = self.flags.unwrap_or_else(|| {
            Arc::new(FeatureFlags::new(
                config.retry.enabled,
                config.circuit_breaker.enabled,
                config.websocket.enabled,
            ))
        });
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(MetricsAggregator::new(config.metrics_window)));
        let hub = self
            .hub
            .unwrap_or_else(|| Arc::new(WebSocketHub::new(config.websocket.client_buffer)));
        let (shutdown, _) = watch::channel(false);

        info!(
            source_service = %config.source_service,
            failure_threshold = config.circuit_breaker.failure_threshold,
            reset_timeout_ms = config.circuit_breaker.reset_timeout.as_millis() as u64,
            "Event bus initialized"
        );

        Ok(EventBus {
            inner: Arc::new(BusCore {
                retry: RetryPolicy::new(config.retry.clone()),
                config,
                subscriptions: SubscriptionRegistry::new(),
                breakers,
                flags,
                metrics,
                hub,
                http_client,
                shutdown,
            }),
        })
    }
}

/// Distributed event bus with per-destination circuit breakers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusCore>,
}

impl EventBus {
    /// Create a bus with fresh shared components.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        Self::builder(config).build()
    }

    pub fn builder(config: BusConfig) -> EventBusBuilder {
        EventBusBuilder {
            config,
            breakers: None,
            flags: None,
            metrics: None,
            hub: None,
            http_client: None,
        }
    }

    // ---------------------------------------------------------------------
    // Subscribing
    // ---------------------------------------------------------------------

    /// Register a destination for an event name.
    ///
    /// Registering the same destination for the same event again returns the
    /// existing handle.
    pub fn subscribe(&self, event_name: EventName, destination: Destination) -> SubscriptionHandle {
        let core = &self.inner;
        let key = destination.key();
        let make_channel = || -> Arc<dyn DeliveryChannel> {
            match destination {
                Destination::Local {
                    handler_id,
                    handler,
                } => Arc::new(LocalChannel::new(&handler_id, handler)),
                Destination::Http { url } => Arc::new(HttpChannel::new(
                    url,
                    core.http_client.clone(),
                    core.config.http.request_timeout,
                )),
                Destination::WebSocket => {
                    let announcer = Arc::downgrade(core);
                    let breakers =
                        ClientBreakers::new(Arc::clone(&core.breakers), Arc::clone(&core.flags))
                            .on_transition(Arc::new(
                                move |transition: &CircuitTransition, during: EventName| {
                                    if let Some(core) = announcer.upgrade() {
                                        core.announce_transition(transition, during);
                                    }
                                },
                            ));
                    Arc::new(
                        WebSocketChannel::new(Arc::clone(&core.hub))
                            .with_client_breakers(breakers),
                    )
                }
            }
        };
        let (handle, _created) = core.subscriptions.insert_with(event_name, key, make_channel);
        handle
    }

    /// Register an in-process handler.
    pub fn subscribe_local(
        &self,
        event_name: EventName,
        handler_id: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionHandle {
        self.subscribe(event_name, Destination::local(handler_id, handler))
    }

    /// Register a handler that receives `T`'s decoded payload.
    pub fn subscribe_typed<T, F>(&self, handler_id: impl Into<String>, f: F) -> SubscriptionHandle
    where
        T: TypedEvent,
        F: Fn(T, &EventEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_local(T::NAME, handler_id, Arc::new(TypedHandler::new(f)))
    }

    /// Remove a registration. Deliveries already running finish.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.subscriptions.remove(handle)
    }

    pub fn unsubscribe_by_id(&self, id: SubscriptionId) -> Option<SubscriptionHandle> {
        self.inner.subscriptions.remove_by_id(id)
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
        self.inner.subscriptions.list()
    }

    // ---------------------------------------------------------------------
    // Publishing
    // ---------------------------------------------------------------------

    /// Publish an event and wait for every subscriber's outcome.
    ///
    /// Fails only when the bus is shutting down; subscriber failures are
    /// reported in the result.
    pub async fn publish(
        &self,
        event_name: EventName,
        payload: serde_json::Value,
    ) -> Result<DispatchResult, BusError> {
        Ok(self.dispatch(event_name, payload)?.wait().await)
    }

    /// Publish an event and return once its deliveries are scheduled.
    pub fn dispatch(
        &self,
        event_name: EventName,
        payload: serde_json::Value,
    ) -> Result<PendingDispatch, BusError> {
        let envelope = EventEnvelope::new(event_name, payload, self.source_service());
        self.dispatch_envelope(Arc::new(envelope))
    }

    /// Publish a pre-built envelope and wait for every outcome.
    ///
    /// Envelopes are not deduplicated: publishing the same one twice
    /// delivers it twice.
    pub async fn publish_envelope(
        &self,
        envelope: Arc<EventEnvelope>,
    ) -> Result<DispatchResult, BusError> {
        Ok(self.dispatch_envelope(envelope)?.wait().await)
    }

    pub fn dispatch_envelope(
        &self,
        envelope: Arc<EventEnvelope>,
    ) -> Result<PendingDispatch, BusError> {
        if self.inner.is_shutting_down() {
            warn!(event = %envelope.event_name(), "Publish rejected, bus is shutting down");
            return Err(BusError::ShuttingDown);
        }
        info!(
            correlation_id = %envelope.correlation_id(),
            event = %envelope.event_name(),
            "Publishing event"
        );
        Ok(spawn_dispatch(&self.inner, envelope))
    }

    /// Publish a typed event and wait for every outcome.
    pub async fn publish_typed<T: TypedEvent>(
        &self,
        event: &T,
    ) -> Result<DispatchResult, BusError> {
        let envelope = EventEnvelope::typed(event, self.source_service())?;
        self.publish_envelope(Arc::new(envelope)).await
    }

    /// Stop accepting publishes and cancel pending retries.
    ///
    /// Attempts already in flight run to completion.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.send_replace(true) {
            info!("Event bus shutting down");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down()
    }

    // ---------------------------------------------------------------------
    // Shared components
    // ---------------------------------------------------------------------

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    pub fn source_service(&self) -> &str {
        &self.inner.config.source_service
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.inner.breakers
    }

    pub fn feature_flags(&self) -> &Arc<FeatureFlags> {
        &self.inner.flags
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.inner.metrics
    }

    pub fn websocket_hub(&self) -> &Arc<WebSocketHub> {
        &self.inner.hub
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner
            .metrics
            .snapshot(&self.inner.breakers, &self.inner.hub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::handler_fn;
    use crate::dispatch::DeliveryOutcome;
    use crate::features::Feature;
    use crate::payloads::KitAssigned;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bus() -> EventBus {
        EventBus::new(BusConfig::default()).unwrap()
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        let counter = Arc::clone(counter);
        handler_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let result = bus()
            .publish(EventName::KitCreated, serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.outcomes.is_empty());
        assert!(result.all_delivered());
    }

    #[tokio::test]
    async fn test_publish_local() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe_local(EventName::KitCreated, "audit", counting_handler(&calls));

        let result = bus
            .publish(EventName::KitCreated, serde_json::json!({"kitId": "k1"}))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.delivered(), 1);
        assert_eq!(bus.metrics_snapshot().event_count, 1);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = bus.subscribe_local(EventName::KitCreated, "audit", counting_handler(&calls));
        let b = bus.subscribe_local(EventName::KitCreated, "audit", counting_handler(&calls));
        assert_eq!(a, b);

        bus.publish(EventName::KitCreated, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = bus();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = bus.subscribe_local(EventName::KitCreated, "audit", counting_handler(&calls));

        assert!(bus.unsubscribe(&handle));
        bus.publish(EventName::KitCreated, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(bus.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let bus = bus();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe_typed("kits", move |event: KitAssigned, _| {
            sink.lock().push(event.booking_id);
            Ok(())
        });

        let result = bus
            .publish_typed(&KitAssigned {
                kit_id: "kit_1".into(),
                booking_id: "bk_9".into(),
            })
            .await
            .unwrap();
        assert!(result.all_delivered());
        assert_eq!(*seen.lock(), vec!["bk_9".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_rejected() {
        let bus = bus();
        bus.shutdown();
        assert!(bus.is_shutting_down());
        let err = bus
            .publish(EventName::KitCreated, serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_breaker_disabled_never_rejects() {
        let bus = bus();
        bus.feature_flags().set(Feature::CircuitBreakerEnabled, false);
        bus.feature_flags().set(Feature::RetryEnabled, false);
        bus.subscribe_local(
            EventName::KitCreated,
            "broken",
            handler_fn(|_| Err(HandlerError::failed("nope"))),
        );

        for _ in 0..10 {
            let result = bus
                .publish(EventName::KitCreated, serde_json::Value::Null)
                .await
                .unwrap();
            assert!(matches!(
                result.outcomes[0].outcome,
                DeliveryOutcome::Failed { .. }
            ));
        }
        assert_eq!(bus.circuit_breakers().state("local:broken"), CircuitState::Closed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = BusConfig::default();
        config.metrics_window = 0;
        assert!(matches!(EventBus::new(config), Err(BusError::Config(_))));
    }
}
