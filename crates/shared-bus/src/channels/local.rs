//! In-process handler delivery.

use super::{ChannelKind, DeliveryChannel};
use crate::envelope::EventEnvelope;
use crate::error::{DeliveryError, HandlerError};
use crate::events::TypedEvent;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// An in-process subscriber.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventEnvelope) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        (self.0)(envelope)
    }
}

/// Wrap a synchronous closure as an [`EventHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&EventEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handler that receives the decoded payload of a [`TypedEvent`].
///
/// Payloads that do not decode fail with
/// [`HandlerError::MalformedPayload`], which is never retried.
pub struct TypedHandler<T, F> {
    f: F,
    _event: PhantomData<fn() -> T>,
}

impl<T, F> TypedHandler<T, F>
where
    T: TypedEvent,
    F: Fn(T, &EventEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> EventHandler for TypedHandler<T, F>
where
    T: TypedEvent,
    F: Fn(T, &EventEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload = envelope
            .payload_as::<T>()
            .map_err(|e| HandlerError::MalformedPayload(e.to_string()))?;
        (self.f)(payload, envelope)
    }
}

/// Delivers to a registered [`EventHandler`] inside the dispatch task.
pub struct LocalChannel {
    key: String,
    handler: Arc<dyn EventHandler>,
}

impl LocalChannel {
    pub fn new(handler_id: &str, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            key: format!("local:{}", handler_id),
            handler,
        }
    }
}

#[async_trait]
impl DeliveryChannel for LocalChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Local
    }

    fn destination_key(&self) -> &str {
        &self.key
    }

    async fn deliver(&self, envelope: &Arc<EventEnvelope>) -> Result<(), DeliveryError> {
        match AssertUnwindSafe(self.handler.handle(envelope))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(panic) => Err(DeliveryError::Handler {
                message: format!("handler panicked: {}", panic_message(panic.as_ref())),
                retryable: false,
            }),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
