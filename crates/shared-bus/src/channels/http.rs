//! Service-to-service delivery over HTTP.

use super::{ChannelKind, DeliveryChannel};
use crate::envelope::EventEnvelope;
use crate::error::DeliveryError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Header carrying the envelope's correlation ID.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Header carrying the envelope's event name.
pub const EVENT_NAME_HEADER: &str = "x-event-name";

/// POSTs the JSON envelope to a fixed URL.
///
/// The [`reqwest::Client`] is shared across every HTTP subscription of a bus
/// so connections are pooled per host.
pub struct HttpChannel {
    key: String,
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpChannel {
    pub fn new(url: impl Into<String>, client: reqwest::Client, timeout: Duration) -> Self {
        let url = url.into();
        Self {
            key: format!("http:{}", url),
            url,
            client,
            timeout,
        }
    }
}

#[async_trait]
impl DeliveryChannel for HttpChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Http
    }

    fn destination_key(&self) -> &str {
        &self.key
    }

    async fn deliver(&self, envelope: &Arc<EventEnvelope>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(CORRELATION_ID_HEADER, envelope.correlation_id().to_string())
            .header(EVENT_NAME_HEADER, envelope.event_name().as_str())
            .json(envelope.as_ref())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        trace!(url = %self.url, status = %status, "HTTP delivery response");
        classify_status(status)
    }
}

/// Map a response status onto the delivery error taxonomy.
pub fn classify_status(status: StatusCode) -> Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("destination responded {}", status);
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Err(DeliveryError::Transient(message))
    } else {
        Err(DeliveryError::Permanent(message))
    }
}

fn classify_transport_error(err: reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::Permanent(format!("invalid request: {}", err))
    } else {
        // Timeouts, refused connections and dropped streams may all clear up.
        DeliveryError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventName;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use std::sync::atomic::{AtomicU16, Ordering};

    async fn spawn_destination(status: Arc<AtomicU16>) -> String {
        let app = Router::new().route(
            "/events",
            post(move |headers: HeaderMap, body: String| {
                let status = Arc::clone(&status);
                async move {
                    assert!(headers.contains_key(CORRELATION_ID_HEADER));
                    assert!(body.contains("eventName"));
                    axum::http::StatusCode::from_u16(status.load(Ordering::SeqCst)).unwrap()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/events", addr)
    }

    fn envelope() -> Arc<EventEnvelope> {
        Arc::new(EventEnvelope::new(
            EventName::BookingCreated,
            serde_json::json!({"bookingId": "bk_1"}),
            "bookings",
        ))
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::OK).is_ok());
        assert!(classify_status(StatusCode::ACCEPTED).is_ok());
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(DeliveryError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Err(DeliveryError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            Err(DeliveryError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            Err(DeliveryError::Permanent(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Err(DeliveryError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn test_http_delivery_statuses() {
        let status = Arc::new(AtomicU16::new(200));
        let url = spawn_destination(Arc::clone(&status)).await;
        let channel = HttpChannel::new(&url, reqwest::Client::new(), Duration::from_secs(5));
        assert_eq!(channel.destination_key(), format!("http:{}", url));

        channel.deliver(&envelope()).await.unwrap();

        status.store(503, Ordering::SeqCst);
        let err = channel.deliver(&envelope()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transient(_)));

        status.store(422, Ordering::SeqCst);
        let err = channel.deliver(&envelope()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = HttpChannel::new(
            format!("http://{}/events", addr),
            reqwest::Client::new(),
            Duration::from_secs(2),
        );
        let err = channel.deliver(&envelope()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transient(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_permanent() {
        let channel = HttpChannel::new(
            "not a url",
            reqwest::Client::new(),
            Duration::from_secs(1),
        );
        let err = channel.deliver(&envelope()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
    }
}
