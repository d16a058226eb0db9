//! Downstream WebSocket Handler
//!
//! One task per client connection. Inbound text frames are forwarded to
//! the relay; outbound frames arrive through a bounded channel drained by
//! a dedicated writer task, so the relay never waits on a slow socket.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{ClientSink, SinkError};
use crate::application::services::RelayHandle;
use crate::domain::streaming::ClientId;

/// `ClientSink` backed by a bounded channel to the client's writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    /// Wrap the sending half of a client's outbound queue.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl ClientSink for ChannelSink {
    fn send(&self, frame: String) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Shared state for the WebSocket endpoint.
#[derive(Debug)]
pub struct WsState {
    relay: RelayHandle,
    client_buffer: usize,
}

impl WsState {
    /// Create endpoint state.
    #[must_use]
    pub fn new(relay: RelayHandle, client_buffer: usize) -> Self {
        Self {
            relay,
            client_buffer: client_buffer.max(1),
        }
    }
}

/// Upgrade the request and hand the socket to `handle_socket`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<WsState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: Arc<WsState>) {
    let client = ClientId::generate();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.client_buffer);

    if state
        .relay
        .client_connected(client, Box::new(ChannelSink::new(tx)))
        .await
        .is_err()
    {
        tracing::debug!(peer = %peer, "Relay stopped, dropping upgraded socket");
        return;
    }
    tracing::debug!(client_id = %client, peer = %peer, "WebSocket upgraded");

    // Ends when the relay drops the sink or the socket stops accepting writes
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            message = receiver.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                };
                if state.relay.client_frame(client, text).await.is_err() {
                    break;
                }
            }
            _ = &mut writer => break,
        }
    }

    let _ = state.relay.client_disconnected(client).await;
    writer.abort();
    tracing::debug!(client_id = %client, peer = %peer, "WebSocket closed");
}
