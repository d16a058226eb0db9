//! Downstream WebSocket Endpoint
//!
//! - `server`: axum server bound to the client port
//! - `handler`: Per-connection reader and writer tasks, `ChannelSink`

pub mod handler;
pub mod server;

pub use handler::{ChannelSink, WsState};
pub use server::{RelayServer, RelayServerError};
