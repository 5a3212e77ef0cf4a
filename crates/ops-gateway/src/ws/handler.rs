//! WebSocket connections.
//!
//! Each connection registers with the bus's `WebSocketHub` and runs one
//! loop that both answers client requests and forwards pushed envelopes.
//! Subscribing to an event name also registers the WebSocket destination
//! for it on the bus, so the hub is reached at all. Each client sits behind
//! its own circuit breaker, which is forgotten when the client disconnects.
//!
//! Security features:
//! - Message size limits
//! - Rate limiting per connection
//! - Idle timeout

use super::protocol::{parse_command, ClientCommand, ServerReply};
use crate::config::WebSocketConfig;
use crate::router::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use shared_bus::{ClientId, Destination, EventBus, EventEnvelope, WebSocketHub};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let bus = state.bus.clone();
    let config = state.config.websocket.clone();
    ws.on_upgrade(move |socket| ConnectionHandler::new(bus, config).handle(socket))
}

/// One connected client
struct ConnectionHandler {
    bus: EventBus,
    hub: Arc<WebSocketHub>,
    config: WebSocketConfig,
    /// Message counter for rate limiting
    message_count: u32,
    /// Rate limit window start
    rate_limit_window: Instant,
}

impl ConnectionHandler {
    fn new(bus: EventBus, config: WebSocketConfig) -> Self {
        Self {
            hub: Arc::clone(bus.websocket_hub()),
            bus,
            config,
            message_count: 0,
            rate_limit_window: Instant::now(),
        }
    }

    /// Check rate limit, returns true if request is allowed
    fn check_rate_limit(&mut self) -> bool {
        let now = Instant::now();

        // Reset window every second
        if now.duration_since(self.rate_limit_window) >= Duration::from_secs(1) {
            self.rate_limit_window = now;
            self.message_count = 0;
        }

        self.message_count += 1;
        self.message_count <= self.config.rate_limit
    }

    /// Validate and apply one inbound frame, returning the reply.
    fn handle_frame(&mut self, client: ClientId, text: &str) -> ServerReply {
        if text.len() > self.config.max_message_size {
            warn!(
                client = %client,
                size = text.len(),
                max = self.config.max_message_size,
                "Message exceeds size limit"
            );
            return ServerReply::error(format!(
                "message too large: {} bytes (max: {})",
                text.len(),
                self.config.max_message_size
            ));
        }

        if !self.check_rate_limit() {
            return ServerReply::error("rate limit exceeded");
        }

        let command = match parse_command(text) {
            Ok(command) => command,
            Err(message) => return ServerReply::error(message),
        };

        let current = match command {
            ClientCommand::Subscribe(names) => {
                for name in &names {
                    self.bus.subscribe(*name, Destination::WebSocket);
                }
                self.hub.subscribe(client, names)
            }
            ClientCommand::Unsubscribe(names) => self.hub.unsubscribe(client, names),
        };

        match current {
            Some(subscribed) => {
                debug!(client = %client, ?subscribed, "Subscriptions updated");
                ServerReply::Subscribed { subscribed }
            }
            // The hub evicted us between frames
            None => ServerReply::error("connection no longer registered"),
        }
    }

    async fn handle(mut self, socket: WebSocket) {
        let (client, mut events) = self.hub.connect();
        info!(client = %client, "WebSocket client connected");

        let (mut sink, mut stream) = socket.split();
        let idle_timeout = self.config.idle_timeout;
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                inbound = stream.next() => {
                    let text = match inbound {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                            Ok(text) => text,
                            Err(_) => {
                                let reply = ServerReply::error("binary frames must be UTF-8 JSON");
                                if sink.send(Message::Text(reply.to_text())).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        },
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            // axum answers pings itself
                            last_activity = Instant::now();
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(client = %client, error = %e, "WebSocket receive error");
                            break;
                        }
                    };
                    last_activity = Instant::now();

                    let reply = self.handle_frame(client, &text);
                    if let Err(e) = sink.send(Message::Text(reply.to_text())).await {
                        error!(client = %client, error = %e, "Failed to send WebSocket response");
                        break;
                    }
                }
                pushed = events.recv() => {
                    let Some(envelope) = pushed else {
                        // Evicted by the hub
                        break;
                    };
                    if let Err(e) = forward(&mut sink, &envelope).await {
                        debug!(client = %client, error = %e, "Failed to push event");
                        break;
                    }
                    // A listen-only client is live as long as pushes go through
                    last_activity = Instant::now();
                }
                _ = tokio::time::sleep_until(last_activity + idle_timeout) => {
                    info!(client = %client, "Closing idle WebSocket connection");
                    break;
                }
            }
        }

        self.hub.disconnect(client);
        self.bus.circuit_breakers().remove(&client.destination_key());
        let _ = sink.close().await;
        info!(client = %client, "WebSocket client disconnected");
    }
}

async fn forward<S>(sink: &mut S, envelope: &EventEnvelope) -> Result<(), String>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(envelope).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::{BusConfig, EventName};

    fn handler(rate_limit: u32, max_message_size: usize) -> ConnectionHandler {
        let config = WebSocketConfig {
            rate_limit,
            max_message_size,
            ..WebSocketConfig::default()
        };
        ConnectionHandler::new(EventBus::new(BusConfig::default()).unwrap(), config)
    }

    #[tokio::test]
    async fn test_subscribe_frame_registers_with_hub() {
        let mut handler = handler(10, 1024);
        let (client, _rx) = handler.hub.connect();

        let reply = handler.handle_frame(client, r#"{"subscribe":["LOCATION_CREATED"]}"#);
        assert_eq!(
            reply,
            ServerReply::Subscribed {
                subscribed: vec![EventName::LocationCreated]
            }
        );
        assert_eq!(handler.hub.subscribers_of(EventName::LocationCreated), 1);
        assert_eq!(handler.bus.subscriptions()[0].destination, "websocket");
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let mut handler = handler(2, 1024);
        let (client, _rx) = handler.hub.connect();

        let frame = r#"["BOOKING_CREATED"]"#;
        assert!(matches!(handler.handle_frame(client, frame), ServerReply::Subscribed { .. }));
        assert!(matches!(handler.handle_frame(client, frame), ServerReply::Subscribed { .. }));
        assert_eq!(
            handler.handle_frame(client, frame),
            ServerReply::error("rate limit exceeded")
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut handler = handler(10, 16);
        let (client, _rx) = handler.hub.connect();

        let reply = handler.handle_frame(client, r#"{"subscribe":["LOCATION_CREATED"]}"#);
        assert!(matches!(reply, ServerReply::Error { error } if error.contains("too large")));
        assert_eq!(handler.hub.subscribers_of(EventName::LocationCreated), 0);
    }

    #[tokio::test]
    async fn test_disconnected_client() {
        let mut handler = handler(10, 1024);
        let (client, _rx) = handler.hub.connect();
        handler.hub.disconnect(client);

        let reply = handler.handle_frame(client, r#"["LOCATION_CREATED"]"#);
        assert!(matches!(reply, ServerReply::Error { .. }));
    }
}
