//! Typed payloads for the events publishers emit most often.

use crate::events::{EventName, TypedEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCreated {
    pub location_id: String,
    pub organization_id: String,
    pub name: String,
}

impl TypedEvent for LocationCreated {
    const NAME: EventName = EventName::LocationCreated;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationApproved {
    pub location_id: String,
    pub organization_id: String,
    pub approved_by: String,
}

impl TypedEvent for LocationApproved {
    const NAME: EventName = EventName::LocationApproved;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRejected {
    pub location_id: String,
    pub organization_id: String,
    pub reason: String,
}

impl TypedEvent for LocationRejected {
    const NAME: EventName = EventName::LocationRejected;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreated {
    pub booking_id: String,
    pub organization_id: String,
    pub location_id: String,
    pub starts_at: DateTime<Utc>,
}

impl TypedEvent for BookingCreated {
    const NAME: EventName = EventName::BookingCreated;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCancelled {
    pub booking_id: String,
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TypedEvent for BookingCancelled {
    const NAME: EventName = EventName::BookingCancelled;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitAssigned {
    pub kit_id: String,
    pub booking_id: String,
}

impl TypedEvent for KitAssigned {
    const NAME: EventName = EventName::KitAssigned;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffAssigned {
    pub staff_id: String,
    pub booking_id: String,
    pub role: String,
}

impl TypedEvent for StaffAssigned {
    const NAME: EventName = EventName::StaffAssigned;
}

/// Amounts are in minor units of `currency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseSubmitted {
    pub expense_id: String,
    pub organization_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

impl TypedEvent for ExpenseSubmitted {
    const NAME: EventName = EventName::ExpenseSubmitted;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerOpened {
    pub destination: String,
    pub failure_count: u32,
}

impl TypedEvent for CircuitBreakerOpened {
    const NAME: EventName = EventName::CircuitBreakerOpened;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerClosed {
    pub destination: String,
}

impl TypedEvent for CircuitBreakerClosed {
    const NAME: EventName = EventName::CircuitBreakerClosed;
}
