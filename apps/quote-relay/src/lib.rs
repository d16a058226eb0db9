#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Quote Relay - Real-time Quote Fan-out
//!
//! Maintains one WebSocket connection to an upstream market data provider
//! and multiplexes its ticks to many downstream WebSocket clients, each
//! with its own symbol subscription set. The upstream connection carries
//! exactly the union of every client's symbols.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data types
//!   - `subscription`: Subscription Registry with reverse index
//!   - `streaming`: Client ids, symbols, verbatim ticks
//!   - `protocol`: Client and upstream wire messages
//!
//! - **Application**: Relay core and port definitions
//!   - `ports`: Client sinks and the upstream connector
//!   - `services`: Relay state, actor, upstream link, router, backoff
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: tokio-tungstenite client sessions
//!   - `websocket`: axum endpoint for downstream clients
//!   - `config`: Environment configuration
//!   - `health`: Health, metrics and reconnect HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                         ┌──────────────┐
//!  Client 1 ◄──► /ws ───► │              │
//!  Client 2 ◄──► /ws ───► │ Relay actor  │ ◄───► Upstream provider WS
//!  Client N ◄──► /ws ───► │ (one queue)  │
//!                         └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure data types with no I/O.
pub mod domain;

/// Application layer - Relay core and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::protocol::{ClientRequest, ServerMessage, UpstreamRequest};
pub use domain::streaming::{ClientId, Symbol, Tick, TickError};
pub use domain::subscription::{SubscriptionChanges, SubscriptionRegistry, SubscriptionStats};

// Relay core
pub use application::ports::{ClientSink, SinkError, UpstreamConnector};
pub use application::services::{
    LinkState, ReconnectConfig, RelayHandle, RelaySettings, RelayStatus, StatusSnapshot,
    spawn_relay,
};

// Infrastructure config
pub use infrastructure::config::{
    BufferSettings, ConfigError, Credentials, RelayConfig, ServerSettings, UpstreamSettings,
};

// Servers and connector
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::upstream::{HeartbeatConfig, UpstreamError, WsConnector};
pub use infrastructure::websocket::{RelayServer, RelayServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
