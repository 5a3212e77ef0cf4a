//! # Domain Events
//!
//! Defines the closed catalogue of events that flow through the bus.
//! Payload shapes for the common events live in [`crate::payloads`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Every event the operations platform can publish.
///
/// Serialized as `SCREAMING_SNAKE_CASE` (`LOCATION_APPROVED`), which is the
/// form used on the wire, in WebSocket subscriptions and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    // =========================================================================
    // LOCATIONS
    // =========================================================================
    /// A location was created and awaits approval.
    LocationCreated,
    /// Location details changed.
    LocationUpdated,
    /// A location passed the approval workflow.
    LocationApproved,
    /// A location was rejected by a reviewer.
    LocationRejected,

    // =========================================================================
    // BOOKINGS
    // =========================================================================
    BookingCreated,
    BookingUpdated,
    BookingCancelled,

    // =========================================================================
    // KITS & STAFFING
    // =========================================================================
    KitCreated,
    KitAssigned,
    StaffAssigned,

    // =========================================================================
    // EXPENSES
    // =========================================================================
    ExpenseSubmitted,
    ExpenseApproved,

    // =========================================================================
    // ORGANIZATIONS
    // =========================================================================
    OrganizationCreated,
    RoleAssigned,

    // =========================================================================
    // INFRASTRUCTURE
    // =========================================================================
    /// A destination's circuit breaker tripped.
    CircuitBreakerOpened,
    /// A destination's circuit breaker recovered.
    CircuitBreakerClosed,
}

/// How urgently an event must reach its subscribers.
///
/// Critical events retry sooner and more often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Routine,
    Critical,
}

impl EventName {
    /// All event names, in declaration order.
    pub const ALL: [EventName; 16] = [
        Self::LocationCreated,
        Self::LocationUpdated,
        Self::LocationApproved,
        Self::LocationRejected,
        Self::BookingCreated,
        Self::BookingUpdated,
        Self::BookingCancelled,
        Self::KitCreated,
        Self::KitAssigned,
        Self::StaffAssigned,
        Self::ExpenseSubmitted,
        Self::ExpenseApproved,
        Self::OrganizationCreated,
        Self::RoleAssigned,
        Self::CircuitBreakerOpened,
        Self::CircuitBreakerClosed,
    ];

    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocationCreated => "LOCATION_CREATED",
            Self::LocationUpdated => "LOCATION_UPDATED",
            Self::LocationApproved => "LOCATION_APPROVED",
            Self::LocationRejected => "LOCATION_REJECTED",
            Self::BookingCreated => "BOOKING_CREATED",
            Self::BookingUpdated => "BOOKING_UPDATED",
            Self::BookingCancelled => "BOOKING_CANCELLED",
            Self::KitCreated => "KIT_CREATED",
            Self::KitAssigned => "KIT_ASSIGNED",
            Self::StaffAssigned => "STAFF_ASSIGNED",
            Self::ExpenseSubmitted => "EXPENSE_SUBMITTED",
            Self::ExpenseApproved => "EXPENSE_APPROVED",
            Self::OrganizationCreated => "ORGANIZATION_CREATED",
            Self::RoleAssigned => "ROLE_ASSIGNED",
            Self::CircuitBreakerOpened => "CIRCUIT_BREAKER_OPENED",
            Self::CircuitBreakerClosed => "CIRCUIT_BREAKER_CLOSED",
        }
    }

    /// Criticality used to pick the retry profile.
    #[must_use]
    pub fn criticality(&self) -> Criticality {
        match self {
            Self::LocationApproved
            | Self::LocationRejected
            | Self::BookingCancelled
            | Self::ExpenseApproved
            | Self::CircuitBreakerOpened
            | Self::CircuitBreakerClosed => Criticality::Critical,
            _ => Criticality::Routine,
        }
    }

    /// Whether this event reports circuit-breaker state.
    ///
    /// Deliveries of these events never produce further breaker events.
    #[must_use]
    pub fn is_circuit_breaker_event(&self) -> bool {
        matches!(
            self,
            Self::CircuitBreakerOpened | Self::CircuitBreakerClosed
        )
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown event name: {0}")]
pub struct UnknownEventName(pub String);

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownEventName(s.to_string()))
    }
}

/// A payload type bound to exactly one event name.
///
/// Publishing a `TypedEvent` serializes it under [`TypedEvent::NAME`];
/// typed subscribers deserialize it back and reject malformed payloads.
pub trait TypedEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The event this payload travels under.
    const NAME: EventName;
}
