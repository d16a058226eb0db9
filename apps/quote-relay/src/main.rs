//! Quote Relay Binary
//!
//! Starts the quote fan-out relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKET_DATA_API_KEY`: Upstream API key
//! - `MARKET_DATA_WS_URL`: Upstream WebSocket URL
//!
//! ## Optional
//! - `MARKET_DATA_API_KEY_PARAM`: Query parameter for the key (default: apikey)
//! - `QUOTE_RELAY_WS_PORT`: Client WebSocket port (default: 8080)
//! - `QUOTE_RELAY_WS_PATH`: Client WebSocket path (default: /ws)
//! - `QUOTE_RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `QUOTE_RELAY_RECONNECT_*`, `QUOTE_RELAY_MAX_RECONNECT_ATTEMPTS`: Backoff tuning
//! - `QUOTE_RELAY_HEARTBEAT_INTERVAL_SECS`, `QUOTE_RELAY_HEARTBEAT_TIMEOUT_SECS`
//! - `QUOTE_RELAY_CLIENT_BUFFER`, `QUOTE_RELAY_EVENT_QUEUE`: Queue sizes
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use quote_relay::infrastructure::health::{HealthServer, HealthServerState};
use quote_relay::infrastructure::telemetry;
use quote_relay::{
    HeartbeatConfig, ReconnectConfig, RelayConfig, RelayServer, RelaySettings, WsConnector,
    init_metrics, spawn_relay,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting quote relay");

    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let connector = WsConnector::new(
        config.upstream_url(),
        config.redacted_upstream_url(),
        HeartbeatConfig::from_upstream_settings(&config.upstream),
    );
    let (relay, relay_task) = spawn_relay(
        connector,
        RelaySettings {
            reconnect: ReconnectConfig::from_upstream_settings(&config.upstream),
            event_queue_capacity: config.buffers.event_queue,
            connect_on_start: config.upstream.connect_on_start,
        },
    );

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        relay.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let ws_server = RelayServer::new(
        config.server.ws_path.clone(),
        relay.clone(),
        config.buffers.client_buffer,
        shutdown_token.clone(),
    );
    let ws_port = config.server.ws_port;
    let ws_shutdown = shutdown_token.clone();
    let ws_task = tokio::spawn(async move {
        if let Err(e) = ws_server.run(ws_port).await {
            tracing::error!(error = %e, "WebSocket server error");
            ws_shutdown.cancel();
        }
    });

    tracing::info!("Quote relay ready");

    tokio::select! {
        () = await_shutdown() => {}
        () = shutdown_token.cancelled() => {
            tracing::warn!("Server failure, initiating shutdown");
        }
    }
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    // Stopping the relay drops every client sink, which closes the sockets
    relay.stop().await;
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = relay_task.await;
        let _ = ws_task.await;
        let _ = health_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out");
    }

    tracing::info!("Quote relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        upstream_url = %config.redacted_upstream_url(),
        ws_port = config.server.ws_port,
        ws_path = %config.server.ws_path,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        reconnect_initial_ms = config.upstream.reconnect_delay_initial.as_millis(),
        reconnect_multiplier = config.upstream.reconnect_delay_multiplier,
        max_attempts = config.upstream.max_reconnect_attempts,
        heartbeat_secs = config.upstream.heartbeat_interval.as_secs(),
        client_buffer = config.buffers.client_buffer,
        "Relay tuning"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT.
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
