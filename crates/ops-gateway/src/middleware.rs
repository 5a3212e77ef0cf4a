//! Request middleware: CORS and Prometheus request metrics.

use crate::config::CorsConfig;
use axum::extract::Request;
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};

/// Create CORS layer from gateway config
pub fn create_cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        return CorsLayer::new();
    }

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(config.max_age));

    if config.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<_> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    cors
}

/// Count every request by method and status.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    ops_telemetry::observe_request(
        method.as_str(),
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_builds_for_explicit_origins() {
        let config = CorsConfig {
            enabled: true,
            allowed_origins: vec!["https://ops.example.com".into()],
            max_age: 60,
        };
        let _layer = create_cors_layer(&config);
    }
}
