//! # Subscriptions
//!
//! Who receives which event. A subscription pairs an [`EventName`] with a
//! [`Destination`]; registering the same pair twice returns the original
//! handle instead of creating a duplicate.

use crate::channels::{ChannelKind, DeliveryChannel, EventHandler};
use crate::events::EventName;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Where a subscribed event is delivered.
#[derive(Clone)]
pub enum Destination {
    /// In-process handler, identified by a caller-chosen id.
    Local {
        handler_id: String,
        handler: Arc<dyn EventHandler>,
    },
    /// Another service's HTTP endpoint.
    Http { url: String },
    /// Every WebSocket client subscribed to the event name.
    WebSocket,
}

impl Destination {
    pub fn local(handler_id: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self::Local {
            handler_id: handler_id.into(),
            handler,
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::Http { url: url.into() }
    }

    /// Key used for idempotent registration and metrics. Local and HTTP
    /// destinations also keep their breaker under it.
    pub fn key(&self) -> String {
        match self {
            Self::Local { handler_id, .. } => format!("local:{}", handler_id),
            Self::Http { url } => format!("http:{}", url),
            Self::WebSocket => crate::channels::websocket::WEBSOCKET_DESTINATION.to_string(),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Local { .. } => ChannelKind::Local,
            Self::Http { .. } => ChannelKind::Http,
            Self::WebSocket => ChannelKind::WebSocket,
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { handler_id, .. } => f
                .debug_struct("Local")
                .field("handler_id", handler_id)
                .finish_non_exhaustive(),
            Self::Http { url } => f.debug_struct("Http").field("url", url).finish(),
            Self::WebSocket => f.write_str("WebSocket"),
        }
    }
}

/// Registry-assigned subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub event_name: EventName,
    pub destination: String,
}

/// A registered subscription and the channel that serves it.
pub struct Subscription {
    handle: SubscriptionHandle,
    channel: Arc<dyn DeliveryChannel>,
}

impl Subscription {
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn destination_key(&self) -> &str {
        &self.handle.destination
    }

    pub fn channel(&self) -> &Arc<dyn DeliveryChannel> {
        &self.channel
    }
}

/// Subscriptions indexed by event name.
///
/// Dispatch takes a snapshot of the matching `Arc<Subscription>`s, so a
/// concurrent unsubscribe never cuts off a delivery already in progress.
pub struct SubscriptionRegistry {
    by_event: RwLock<HashMap<EventName, Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            by_event: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `destination` for `event_name`, building its channel only if
    /// the pair is new.
    ///
    /// Returns the handle and whether a new subscription was created.
    pub fn insert_with<F>(
        &self,
        event_name: EventName,
        destination: String,
        make_channel: F,
    ) -> (SubscriptionHandle, bool)
    where
        F: FnOnce() -> Arc<dyn DeliveryChannel>,
    {
        let mut by_event = self.by_event.write();
        let subscriptions = by_event.entry(event_name).or_default();

        if let Some(existing) = subscriptions
            .iter()
            .find(|s| s.handle.destination == destination)
        {
            return (existing.handle.clone(), false);
        }

        let handle = SubscriptionHandle {
            id: SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            event_name,
            destination,
        };
        debug!(
            id = %handle.id,
            event = %event_name,
            destination = %handle.destination,
            "Subscription registered"
        );
        subscriptions.push(Arc::new(Subscription {
            handle: handle.clone(),
            channel: make_channel(),
        }));
        (handle, true)
    }

    /// Remove the subscription a handle refers to.
    pub fn remove(&self, handle: &SubscriptionHandle) -> bool {
        let mut by_event = self.by_event.write();
        let Some(subscriptions) = by_event.get_mut(&handle.event_name) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|s| s.handle.id != handle.id);
        let removed = subscriptions.len() < before;
        if subscriptions.is_empty() {
            by_event.remove(&handle.event_name);
        }
        if removed {
            debug!(id = %handle.id, event = %handle.event_name, "Subscription removed");
        }
        removed
    }

    /// Remove a subscription by id, returning its handle.
    pub fn remove_by_id(&self, id: SubscriptionId) -> Option<SubscriptionHandle> {
        let handle = self
            .by_event
            .read()
            .values()
            .flatten()
            .find(|s| s.handle.id == id)
            .map(|s| s.handle.clone())?;
        self.remove(&handle).then_some(handle)
    }

    /// Snapshot of the subscriptions for an event name.
    pub fn subscribers(&self, event_name: EventName) -> Vec<Arc<Subscription>> {
        self.by_event
            .read()
            .get(&event_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Every registration, ordered by id.
    pub fn list(&self) -> Vec<SubscriptionHandle> {
        let mut handles: Vec<_> = self
            .by_event
            .read()
            .values()
            .flatten()
            .map(|s| s.handle.clone())
            .collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    pub fn len(&self) -> usize {
        self.by_event.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
