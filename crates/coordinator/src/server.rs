//! HTTP server with graceful shutdown
//!
//! Serves the coordinator endpoint until the run completes or the process is
//! signalled, then prints the final result exactly once.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use relay_core::{CoordinatorConfig, Error, FinalResult, Result};

use crate::http_api;
use crate::service::CoordinatorService;

/// Coordinator server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub addr: SocketAddr,
}

impl ServerConfig {
    pub fn from_coordinator(config: &CoordinatorConfig) -> Result<Self> {
        let addr = config
            .socket_address()
            .parse()
            .map_err(|e| Error::InvalidConfig {
                message: format!("bad bind address {}: {}", config.socket_address(), e),
            })?;
        Ok(Self { addr })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
        }
    }
}

/// Coordinator HTTP server
pub struct CoordinatorServer {
    config: ServerConfig,
    service: CoordinatorService,
}

impl CoordinatorServer {
    /// Create a new coordinator server
    pub fn new(service: CoordinatorService) -> Self {
        Self {
            config: ServerConfig::default(),
            service,
        }
    }

    /// Create with custom configuration
    pub fn with_config(service: CoordinatorService, config: ServerConfig) -> Self {
        Self { config, service }
    }

    pub fn service(&self) -> &CoordinatorService {
        &self.service
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<Option<FinalResult>> {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> Result<Option<FinalResult>> {
        let addr = listener.local_addr()?;
        info!(address = %addr, run_id = %self.service.run_id(), "Coordinator listening");

        let router = http_api::create_router(Arc::new(self.service.clone()));
        let service = self.service.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(service))
            .await
            .map_err(|e| {
                error!(error = %e, "Server error");
                Error::Io(e)
            })?;

        println!("{}", self.service.final_report());
        info!(done = self.service.is_done(), "Coordinator shutdown complete");
        Ok(self.service.final_result())
    }
}

/// Wait for run completion, Ctrl+C or SIGTERM
async fn shutdown_signal(service: CoordinatorService) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = service.wait_until_done() => {
            info!("Run complete, initiating graceful shutdown");
        }
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Message;

    #[test]
    fn test_config_from_coordinator() {
        let config = ServerConfig::from_coordinator(&CoordinatorConfig::default()).unwrap();
        assert_eq!(config.addr, "127.0.0.1:5000".parse().unwrap());

        let bad = CoordinatorConfig {
            bind_address: "not an address".to_string(),
            port: 5000,
        };
        assert!(matches!(
            ServerConfig::from_coordinator(&bad),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_serve_stops_when_run_completes() {
        let service = CoordinatorService::new();
        let id = service.handle(Message::register()).unwrap()[0]
            .body_as_id("register")
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = CoordinatorServer::new(service.clone());
        let handle = tokio::spawn(server.serve(listener));

        service
            .handle(Message::finished(id, serde_json::json!({"status": "ok"})))
            .unwrap();
        service.handle(Message::unregister(id)).unwrap();

        let result = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(result.to_string(), "status: ok");
    }
}
