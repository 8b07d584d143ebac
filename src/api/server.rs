//! Admin API Server
//!
//! Serves the admin router until a shutdown signal arrives.

use crate::cache::invalidation::InvalidationManager;
use crate::cache::orchestrator::CacheOrchestrator;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rest::AdminRouter;

/// Configuration for the admin server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

/// Admin REST server
pub struct ApiServer {
    config: ApiServerConfig,
    cache: Arc<CacheOrchestrator>,
    invalidation: Arc<InvalidationManager>,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        cache: Arc<CacheOrchestrator>,
        invalidation: Arc<InvalidationManager>,
    ) -> Self {
        Self {
            config,
            cache,
            invalidation,
            shutdown: CancellationToken::new(),
        }
    }

    /// Serve until [`ApiServer::shutdown`] is called (returns at once if it
    /// already was)
    pub async fn run(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let app = AdminRouter::new(self.cache.clone(), self.invalidation.clone()).build();

        let listener = tokio::net::TcpListener::bind(self.config.rest_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
        info!("Admin API listening on {}", self.config.rest_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Admin API shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
