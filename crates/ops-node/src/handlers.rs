//! # Built-in Handlers
//!
//! In-process subscribers every node registers at startup.

use shared_bus::payloads::{CircuitBreakerClosed, CircuitBreakerOpened};
use shared_bus::{handler_fn, EventBus, EventName, SubscriptionHandle};
use tracing::{info, warn};

/// Handler ID of the audit log subscriber.
pub const AUDIT_HANDLER: &str = "audit-log";

/// Register the audit log for every event plus circuit breaker alerts.
pub fn register_builtin_handlers(bus: &EventBus) -> Vec<SubscriptionHandle> {
    let mut handles: Vec<SubscriptionHandle> = EventName::ALL
        .iter()
        .map(|&name| {
            bus.subscribe_local(
                name,
                AUDIT_HANDLER,
                handler_fn(|envelope| {
                    let metadata = envelope.metadata();
                    info!(
                        target: "ops::audit",
                        correlation_id = %metadata.correlation_id,
                        event = %envelope.event_name(),
                        source = %metadata.source_service,
                        timestamp = %metadata.timestamp,
                        "Event published"
                    );
                    Ok(())
                }),
            )
        })
        .collect();

    handles.push(bus.subscribe_typed(
        "breaker-alerts",
        |opened: CircuitBreakerOpened, _envelope| {
            warn!(
                destination = %opened.destination,
                failures = opened.failure_count,
                "Destination cut off by circuit breaker"
            );
            Ok(())
        },
    ));
    handles.push(bus.subscribe_typed(
        "breaker-alerts",
        |closed: CircuitBreakerClosed, _envelope| {
            info!(destination = %closed.destination, "Destination recovered");
            Ok(())
        },
    ));

    handles
}
