//! Downstream WebSocket Server
//!
//! Serves the client endpoint (`GET /ws` by default) with axum.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::handler::{WsState, ws_handler};
use crate::application::services::RelayHandle;

/// WebSocket server for downstream clients.
pub struct RelayServer {
    path: String,
    state: Arc<WsState>,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a server that upgrades requests on `path`.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        relay: RelayHandle,
        client_buffer: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(WsState::new(relay, client_buffer)),
            cancel,
        }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.path, get(ws_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Bind `port` on all interfaces and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if binding fails or the server fails
    /// while running.
    pub async fn run(self, port: u16) -> Result<(), RelayServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError::ServerFailed` if the server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RelayServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;
        tracing::info!(addr = %local, path = %self.path, "WebSocket server listening");

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.cancel.cancelled_owned())
        .await
        .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;

        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
