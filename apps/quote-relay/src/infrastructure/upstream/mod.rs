//! Upstream Provider Adapter
//!
//! WebSocket client for the upstream quote provider, implementing the
//! `UpstreamConnector` port.
//!
//! - `connection`: Session task per connection attempt
//! - `codec`: JSON command encoding and inbound frame classification
//! - `heartbeat`: Ping interval and silence timeout

use std::time::Duration;

pub mod codec;
pub mod connection;
pub mod heartbeat;

pub use connection::WsConnector;
pub use heartbeat::HeartbeatConfig;

/// Reasons an upstream session ends.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The WebSocket handshake failed.
    #[error("connect failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    /// WebSocket error on an established connection.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A command could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// No inbound traffic within the heartbeat timeout.
    #[error("heartbeat timeout after {0:?} of silence")]
    HeartbeatTimeout(Duration),

    /// The peer sent a close frame.
    #[error("{0}")]
    Closed(String),

    /// The stream ended without a close frame.
    #[error("stream ended")]
    StreamEnded,
}
