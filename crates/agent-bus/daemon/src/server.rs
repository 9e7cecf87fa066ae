//! Server setup and lifecycle management

use std::future::Future;
use std::sync::Arc;

use agent_bus_core::MessageBus;
use axum::Router;
use tokio::net::TcpListener;

use crate::api::{create_router, AppState};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};

/// Agent Bus daemon server
pub struct Server {
    config: DaemonConfig,
    bus: Arc<MessageBus>,
}

impl Server {
    /// Build the bus from configuration. Collaborators default to the
    /// in-memory implementations.
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let bus = MessageBus::builder(config.bus.clone()).build()?;
        Ok(Self {
            config,
            bus: Arc::new(bus),
        })
    }

    /// Serve an already built bus.
    pub fn with_bus(config: DaemonConfig, bus: Arc<MessageBus>) -> Self {
        Self { config, bus }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Router over this server's bus.
    pub fn router(&self) -> Router {
        create_router(AppState::new(self.bus.clone()), &self.config.server)
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        let listener = TcpListener::bind(self.config.server.listen_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Start the bus, serve on `listener` until `shutdown` resolves, then
    /// stop the bus.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> DaemonResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.bus.start().await?;

        let addr = listener.local_addr()?;
        tracing::info!(
            %addr,
            constitutional_hash = %self.config.bus.constitutional_hash,
            strategy = ?self.bus.validation_strategy().kind(),
            "Agent bus daemon listening"
        );

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| DaemonError::Server(e.to_string()));

        tracing::info!("Agent bus daemon shutting down");
        self.bus.stop().await?;

        served
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
