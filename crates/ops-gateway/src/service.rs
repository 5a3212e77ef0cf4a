//! Gateway service - binds the HTTP/WebSocket server around an event bus.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::router::{build_router, AppState};
use axum::Router;
use shared_bus::EventBus;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Gateway service state
pub struct GatewayService {
    config: GatewayConfig,
    bus: EventBus,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl GatewayService {
    /// Create a gateway with its own event bus built from `config.bus`.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let bus = EventBus::new(config.bus.clone())?;
        Ok(Self::with_bus(config, bus))
    }

    /// Create a gateway around an existing bus.
    pub fn with_bus(config: GatewayConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            shutdown_tx: None,
            server: None,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Router with all routes and middleware, without a listener.
    pub fn router(&self) -> Router {
        build_router(AppState::new(self.bus.clone(), self.config.clone()))
    }

    /// Bind and start serving in the background.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 is used.
    pub async fn start(&mut self) -> Result<SocketAddr, GatewayError> {
        if self.server.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }
        info!("Starting gateway...");

        let listener = tokio::net::TcpListener::bind(self.config.http_addr())
            .await
            .map_err(|e| GatewayError::Bind(format!("{}: {}", self.config.http_addr(), e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Bind(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.server = Some(server);
        info!(addr = %addr, "Gateway listening");
        Ok(addr)
    }

    /// Stop the bus, then the server.
    ///
    /// New publishes are refused from here on; pending retries are
    /// cancelled and in-flight requests finish before this returns.
    pub async fn shutdown(&mut self) {
        self.bus.shutdown();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            if let Err(e) = server.await {
                error!(error = %e, "Gateway server task failed");
            }
        }
        info!("Gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn local_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.http.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.http.port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut service = GatewayService::new(local_config()).unwrap();
        let addr = service.start().await.unwrap();
        assert_ne!(addr.port(), 0);

        assert!(matches!(
            service.start().await,
            Err(GatewayError::AlreadyRunning)
        ));

        service.shutdown().await;
        assert!(service.bus().is_shutting_down());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = local_config();
        config.websocket.rate_limit = 0;
        assert!(matches!(
            GatewayService::new(config),
            Err(GatewayError::Config(_))
        ));
    }
}
