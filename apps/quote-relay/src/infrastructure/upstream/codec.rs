//! Upstream Frame Codec
//!
//! Commands go out as JSON text frames. Inbound text frames are passed to
//! the relay untouched; binary frames are accepted when they hold UTF-8.

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::domain::protocol::UpstreamRequest;

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Data for the relay.
    Text(String),
    /// Ping that must be answered with the same payload.
    Ping(Vec<u8>),
    /// Pong or other liveness-only frame.
    Pong,
    /// Peer closed the connection.
    Close(String),
    /// Frame with nothing for the relay (raw frames, non-UTF-8 binary).
    Ignored,
}

/// Encode a subscription command as a text frame.
///
/// # Errors
///
/// Returns an error if the command cannot be serialized.
pub fn encode_request(request: &UpstreamRequest) -> Result<Message, serde_json::Error> {
    Ok(Message::text(request.to_json()?))
}

/// Classify an inbound WebSocket message.
#[must_use]
pub fn decode(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Inbound::Text(text),
            Err(_) => {
                tracing::warn!(len = data.len(), "Ignoring non-UTF-8 binary frame from upstream");
                Inbound::Ignored
            }
        },
        Message::Ping(data) => Inbound::Ping(data.to_vec()),
        Message::Pong(_) => Inbound::Pong,
        Message::Close(frame) => Inbound::Close(close_reason(frame.as_ref())),
        Message::Frame(_) => Inbound::Ignored,
    }
}

fn close_reason(frame: Option<&CloseFrame>) -> String {
    frame.map_or_else(
        || "closed by upstream".to_string(),
        |f| {
            if f.reason.is_empty() {
                format!("closed by upstream ({})", u16::from(f.code))
            } else {
                format!("closed by upstream ({}): {}", u16::from(f.code), f.reason.as_str())
            }
        },
    )
}
