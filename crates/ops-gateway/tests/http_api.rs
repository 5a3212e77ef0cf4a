//! End-to-end tests for the gateway's HTTP and WebSocket surface.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::{SinkExt, StreamExt};
use ops_gateway::{build_router, AppState, GatewayConfig, GatewayService};
use serde_json::{json, Value};
use shared_bus::{handler_fn, EventBus, EventName, Feature};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

fn setup() -> (EventBus, Router) {
    let config = GatewayConfig::default();
    let bus = EventBus::new(config.bus.clone()).unwrap();
    let router = build_router(AppState::new(bus.clone(), config));
    (bus, router)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

// =============================================================================
// EVENTS
// =============================================================================

#[tokio::test]
async fn test_publish_accepted_and_delivered() {
    let (bus, router) = setup();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    bus.subscribe_local(
        EventName::LocationCreated,
        "audit",
        handler_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    let (status, body) = send(
        &router,
        "POST",
        "/api/events",
        Some(json!({ "eventName": "LOCATION_CREATED", "payload": { "locationId": "loc-1" } })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["subscribers"], 1);
    assert!(body["correlationId"].as_str().is_some());

    tokio::time::timeout(Duration::from_secs(2), async {
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(bus.metrics_snapshot().event_count, 1);
}

#[tokio::test]
async fn test_publish_unknown_event() {
    let (_bus, router) = setup();
    let (status, body) = send(
        &router,
        "POST",
        "/api/events",
        Some(json!({ "eventName": "LOCATION_EXPLODED", "payload": {} })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unknown_event");
}

#[tokio::test]
async fn test_publish_malformed_body() {
    let (_bus, router) = setup();
    let (status, body) = send(&router, "POST", "/api/events", Some(json!({ "payload": {} }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_publish_after_shutdown() {
    let (bus, router) = setup();
    bus.shutdown();

    let (status, body) = send(
        &router,
        "POST",
        "/api/events",
        Some(json!({ "eventName": "BOOKING_CREATED", "payload": {} })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "unavailable");
}

// =============================================================================
// FEATURE FLAGS
// =============================================================================

#[tokio::test]
async fn test_toggle_feature() {
    let (bus, router) = setup();

    let (status, body) = send(
        &router,
        "POST",
        "/api/infrastructure/features/websocketEnabled",
        Some(json!({ "enabled": false })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["feature"], "websocketEnabled");
    assert_eq!(body["enabled"], false);
    assert_eq!(body["message"], "websocketEnabled disabled");
    assert!(!bus.feature_flags().is_enabled(Feature::WebsocketEnabled));

    let (status, body) = send(&router, "GET", "/api/infrastructure/features", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["websocketEnabled"], false);
    assert_eq!(body["retryEnabled"], true);
}

#[tokio::test]
async fn test_toggle_unknown_feature() {
    let (_bus, router) = setup();
    let (status, _) = send(
        &router,
        "POST",
        "/api/infrastructure/features/turboMode",
        Some(json!({ "enabled": true })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

#[tokio::test]
async fn test_subscription_lifecycle() {
    let (bus, router) = setup();

    let (status, handle) = send(
        &router,
        "POST",
        "/api/subscriptions",
        Some(json!({ "eventName": "KIT_ASSIGNED", "url": "http://127.0.0.1:9/hooks/kits" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(handle["eventName"], "KIT_ASSIGNED");
    assert_eq!(handle["destination"], "http:http://127.0.0.1:9/hooks/kits");
    assert_eq!(bus.subscriptions().len(), 1);

    let id = handle["id"].as_u64().unwrap();
    let (status, _) = send(&router, "DELETE", &format!("/api/subscriptions/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(bus.subscriptions().is_empty());

    let (status, _) = send(&router, "DELETE", &format!("/api/subscriptions/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subscription_rejects_non_http_url() {
    let (_bus, router) = setup();
    let (status, _) = send(
        &router,
        "POST",
        "/api/subscriptions",
        Some(json!({ "eventName": "KIT_ASSIGNED", "url": "ftp://files" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// CIRCUIT BREAKERS & METRICS
// =============================================================================

#[tokio::test]
async fn test_circuit_breaker_listing_and_reset() {
    let (bus, router) = setup();
    let breakers = bus.circuit_breakers();
    for _ in 0..breakers.config().failure_threshold {
        breakers.record_failure("http:http://billing/hooks");
    }
    assert_eq!(breakers.open_count(), 1);

    let (status, body) = send(&router, "GET", "/api/infrastructure/circuit-breakers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["openCircuits"], 1);
    assert_eq!(body["circuits"][0]["destination"], "http:http://billing/hooks");
    assert_eq!(body["circuits"][0]["state"], "OPEN");

    let (status, body) = send(
        &router,
        "POST",
        "/api/infrastructure/circuit-breakers/reset",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["openCircuits"], 0);
}

#[tokio::test]
async fn test_metrics_endpoints() {
    let (bus, router) = setup();
    bus.publish(EventName::ExpenseSubmitted, json!({})).await.unwrap();

    let (status, body) = send(&router, "GET", "/api/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eventCount"], 1);
    assert_eq!(body["successRate"], 1.0);
    assert_eq!(body["activeCircuitBreakers"], 0);
    assert!(body.get("recentAttempts").is_none());

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("ops_bus_events_published"));
}

#[tokio::test]
async fn test_metrics_recent_attempts() {
    let (bus, router) = setup();
    bus.subscribe_local(EventName::KitCreated, "inventory", handler_fn(|_| Ok(())));
    let first = bus.publish(EventName::KitCreated, json!({})).await.unwrap();
    let second = bus.publish(EventName::KitCreated, json!({})).await.unwrap();

    let (status, body) = send(&router, "GET", "/api/metrics?recent=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eventCount"], 2);
    let recent = body["recentAttempts"].as_array().unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["correlationId"], second.correlation_id.to_string());
    assert_eq!(recent[0]["destination"], "local:inventory");

    let (_, body) = send(&router, "GET", "/api/metrics?recent=10", None).await;
    let recent = body["recentAttempts"].as_array().unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1]["correlationId"], first.correlation_id.to_string());

    let (status, body) = send(&router, "GET", "/api/metrics?recent=lots", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_health() {
    let (_bus, router) = setup();
    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// =============================================================================
// WEBSOCKET
// =============================================================================

#[tokio::test]
async fn test_websocket_receives_subscribed_events() {
    let mut config = GatewayConfig::default();
    config.http.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.http.port = 0;
    let mut service = GatewayService::new(config).unwrap();
    let addr = service.start().await.unwrap();
    let bus = service.bus().clone();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();

    socket
        .send(Message::text(r#"{"subscribe":["BOOKING_CREATED"]}"#))
        .await
        .unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    let reply: Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply, json!({ "subscribed": ["BOOKING_CREATED"] }));

    // Unsubscribed names are not pushed.
    bus.publish(EventName::KitAssigned, json!({ "kitId": "k-1" }))
        .await
        .unwrap();
    let result = bus
        .publish(EventName::BookingCreated, json!({ "bookingId": "b-7" }))
        .await
        .unwrap();
    assert!(result.all_delivered());

    let pushed = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let envelope: Value = serde_json::from_str(pushed.to_text().unwrap()).unwrap();
    assert_eq!(envelope["eventName"], "BOOKING_CREATED");
    assert_eq!(envelope["payload"]["bookingId"], "b-7");
    assert_eq!(
        envelope["metadata"]["correlationId"],
        result.correlation_id.to_string()
    );

    socket.close(None).await.unwrap();
    service.shutdown().await;
}

#[tokio::test]
async fn test_websocket_rejects_unknown_names() {
    let mut config = GatewayConfig::default();
    config.http.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.http.port = 0;
    let mut service = GatewayService::new(config).unwrap();
    let addr = service.start().await.unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    socket
        .send(Message::text(r#"["BOOKING_CREATED","NOT_AN_EVENT"]"#))
        .await
        .unwrap();

    let reply = socket.next().await.unwrap().unwrap();
    let reply: Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert!(reply["error"].as_str().unwrap().contains("NOT_AN_EVENT"));
    assert_eq!(service.bus().websocket_hub().subscribers_of(EventName::BookingCreated), 0);

    socket.close(None).await.unwrap();
    service.shutdown().await;
}

#[tokio::test]
async fn test_websocket_listener_kept_open_while_events_flow() {
    let mut config = GatewayConfig::default();
    config.http.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.http.port = 0;
    config.websocket.idle_timeout = Duration::from_secs(1);
    let mut service = GatewayService::new(config).unwrap();
    let addr = service.start().await.unwrap();
    let bus = service.bus().clone();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    socket
        .send(Message::text(r#"["KIT_CREATED"]"#))
        .await
        .unwrap();
    socket.next().await.unwrap().unwrap();

    // Never sends another frame; 12 pushes 200ms apart outlast the timeout.
    for i in 0..12 {
        let result = bus
            .publish(EventName::KitCreated, json!({ "kitId": format!("k-{}", i) }))
            .await
            .unwrap();
        assert!(result.all_delivered(), "push {} not delivered", i);

        let frame = tokio::time::timeout(Duration::from_secs(1), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(frame.is_text(), "push {} arrived as {:?}", i, frame);
        let envelope: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(envelope["payload"]["kitId"], format!("k-{}", i));

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(bus.websocket_hub().connected_clients(), 1);

    socket.close(None).await.unwrap();
    service.shutdown().await;
}

#[tokio::test]
async fn test_websocket_silent_connection_closed_after_idle_timeout() {
    let mut config = GatewayConfig::default();
    config.http.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.http.port = 0;
    config.websocket.idle_timeout = Duration::from_secs(1);
    let mut service = GatewayService::new(config).unwrap();
    let addr = service.start().await.unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(3), socket.next())
        .await
        .unwrap();
    assert!(matches!(frame, None | Some(Ok(Message::Close(_))) | Some(Err(_))));

    service.shutdown().await;
}
