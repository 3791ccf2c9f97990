//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api;
use crate::collaborators::create_collaborators;
use crate::config::LaunchpadConfig;
use crate::error::{ControlError, ControlResult};

/// The control service.
///
/// Wires collaborators, the orchestrator and the HTTP API together, then
/// serves until Ctrl+C, SIGTERM or [`shutdown`](Self::shutdown). Deployments
/// already running are allowed to finish before [`run`](Self::run) returns.
pub struct ControlService {
    config: LaunchpadConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: LaunchpadConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> ControlResult<()> {
        let listener = TcpListener::bind(self.config.server.listen)
            .await
            .map_err(|e| ControlError::server(format!("failed to bind TCP: {e}")))?;
        self.serve(listener).await
    }

    /// Run on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> ControlResult<()> {
        let collaborators = create_collaborators(&self.config)?;
        info!(
            mode = ?self.config.collaborators.mode,
            base_domain = %self.config.domain.base_domain,
            "collaborators configured"
        );

        let state = api::AppState::new(collaborators, &self.config);
        let tasks = state.tasks.clone();
        let app = api::router(state);

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "control service listening");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::server(format!("server error: {e}")))?;

        tasks.close();
        if !tasks.is_empty() {
            info!(running = tasks.len(), "waiting for running deployments");
        }
        tasks.wait().await;

        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::CollaboratorMode;

    fn mock_config() -> LaunchpadConfig {
        let mut config = LaunchpadConfig::default();
        config.collaborators.mode = CollaboratorMode::Mock;
        config
    }

    #[test]
    fn service_creation() {
        let service = ControlService::new(mock_config());
        assert!(!service.cancel.is_cancelled());
    }

    #[test]
    fn service_shutdown() {
        let service = ControlService::new(mock_config());
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn serve_returns_after_shutdown() {
        let service = ControlService::new(mock_config());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        service.shutdown();
        service.serve(listener).await.unwrap();
    }
}
