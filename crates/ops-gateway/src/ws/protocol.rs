//! Client/server messages on the `/ws` endpoint.
//!
//! Clients send one of:
//!
//! ```text
//! { "subscribe": ["LOCATION_CREATED", "BOOKING_CREATED"] }
//! ["LOCATION_CREATED", "BOOKING_CREATED"]
//! { "unsubscribe": ["BOOKING_CREATED"] }
//! ```
//!
//! and receive `{ "subscribed": [...] }` with the connection's full event
//! set, `{ "error": "..." }`, or pushed envelopes.

use serde::{Deserialize, Serialize};
use shared_bus::EventName;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMessage {
    Subscribe { subscribe: Vec<String> },
    Unsubscribe { unsubscribe: Vec<String> },
    Names(Vec<String>),
}

/// Parsed client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(Vec<EventName>),
    Unsubscribe(Vec<EventName>),
}

/// Server reply to a client request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerReply {
    Subscribed { subscribed: Vec<EventName> },
    Error { error: String },
}

impl ServerReply {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn to_text(&self) -> String {
        // Serializing a vec of unit enums or a string cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Parse a text frame into a command.
///
/// Every name must be known; one bad name rejects the whole request.
pub fn parse_command(text: &str) -> Result<ClientCommand, String> {
    let raw: RawMessage = serde_json::from_str(text).map_err(|_| {
        String::from(
            "expected {\"subscribe\": [...]}, {\"unsubscribe\": [...]} or an array of event names",
        )
    })?;

    match raw {
        RawMessage::Subscribe { subscribe } | RawMessage::Names(subscribe) => {
            parse_names(&subscribe).map(ClientCommand::Subscribe)
        }
        RawMessage::Unsubscribe { unsubscribe } => {
            parse_names(&unsubscribe).map(ClientCommand::Unsubscribe)
        }
    }
}

fn parse_names(names: &[String]) -> Result<Vec<EventName>, String> {
    names
        .iter()
        .map(|name| name.parse::<EventName>().map_err(|e| e.to_string()))
        .collect()
}
