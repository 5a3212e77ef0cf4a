//! # Event Envelope
//!
//! The unit carried through every delivery channel: event name, payload and
//! metadata. Envelopes are immutable once built; the bus shares them as
//! `Arc<EventEnvelope>` and channels only ever read them.

use crate::error::DeliveryError;
use crate::events::{Criticality, EventName, TypedEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation ID for tracking one published event through every delivery.
///
/// Uses UUID v7, which is time-ordered and sorts by publish time in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata stamped on every envelope at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub source_service: String,
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    event_name: EventName,
    payload: serde_json::Value,
    metadata: EnvelopeMetadata,
}

impl EventEnvelope {
    /// Build an envelope with a fresh correlation ID and the current time.
    pub fn new(
        event_name: EventName,
        payload: serde_json::Value,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            event_name,
            payload,
            metadata: EnvelopeMetadata {
                timestamp: Utc::now(),
                correlation_id: CorrelationId::new(),
                source_service: source_service.into(),
            },
        }
    }

    /// Build an envelope from a typed payload.
    pub fn typed<T: TypedEvent>(
        event: &T,
        source_service: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(T::NAME, payload, source_service))
    }

    pub fn event_name(&self) -> EventName {
        self.event_name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn metadata(&self) -> &EnvelopeMetadata {
        &self.metadata
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.metadata.correlation_id
    }

    pub fn criticality(&self) -> Criticality {
        self.event_name.criticality()
    }

    /// Decode the payload as `T`.
    ///
    /// A name mismatch or a payload that does not fit `T` is a permanent
    /// failure: retrying cannot change the bytes.
    pub fn payload_as<T: TypedEvent>(&self) -> Result<T, DeliveryError> {
        if self.event_name != T::NAME {
            return Err(DeliveryError::Permanent(format!(
                "payload for {} cannot be read as {}",
                self.event_name,
                T::NAME
            )));
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DeliveryError::Permanent(format!("malformed {} payload: {}", self.event_name, e))
        })
    }

    /// Serialize the whole envelope as JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::LocationApproved;

    #[test]
    fn test_envelope_metadata() {
        let envelope = EventEnvelope::new(
            EventName::LocationCreated,
            serde_json::json!({"locationId": "loc_1"}),
            "locations",
        );
        assert_eq!(envelope.event_name(), EventName::LocationCreated);
        assert_eq!(envelope.metadata().source_service, "locations");
        assert_eq!(envelope.criticality(), Criticality::Routine);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = EventEnvelope::new(EventName::KitCreated, serde_json::Value::Null, "kits");
        let b = EventEnvelope::new(EventName::KitCreated, serde_json::Value::Null, "kits");
        assert_ne!(a.correlation_id(), b.correlation_id());
    }

    #[test]
    fn test_wire_format() {
        let envelope = EventEnvelope::new(
            EventName::LocationApproved,
            serde_json::json!({"locationId": "loc_1"}),
            "locations",
        );
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(json["eventName"], "LOCATION_APPROVED");
        assert_eq!(json["metadata"]["sourceService"], "locations");
        assert!(json["metadata"]["correlationId"].is_string());
        assert!(json["metadata"]["timestamp"].is_string());
    }

    #[test]
    fn test_payload_as_typed() {
        let event = LocationApproved {
            location_id: "loc_1".into(),
            organization_id: "org_1".into(),
            approved_by: "user_1".into(),
        };
        let envelope = EventEnvelope::typed(&event, "locations").unwrap();
        assert_eq!(envelope.event_name(), EventName::LocationApproved);
        assert_eq!(envelope.payload_as::<LocationApproved>().unwrap(), event);
    }

    #[test]
    fn test_malformed_payload_is_permanent() {
        let envelope = EventEnvelope::new(
            EventName::LocationApproved,
            serde_json::json!({"unexpected": true}),
            "locations",
        );
        let err = envelope.payload_as::<LocationApproved>().unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
    }

    #[test]
    fn test_parse_correlation_id() {
        let id = CorrelationId::new();
        let parsed = CorrelationId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
