//! Upstream WebSocket Connector
//!
//! Each `open` spawns one session task that dials the upstream provider,
//! writes queued subscription commands, keeps the connection alive with
//! pings, and reports every lifecycle event to the relay tagged with its
//! session id. A cancelled session reports nothing further.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::UpstreamError;
use super::codec::{self, Inbound};
use super::heartbeat::{Heartbeat, HeartbeatConfig};
use crate::application::ports::{UpstreamConnector, UpstreamEvents, UpstreamSession};
use crate::domain::protocol::UpstreamRequest;

/// Opens tokio-tungstenite client sessions to the upstream provider.
#[derive(Clone)]
pub struct WsConnector {
    url: String,
    redacted_url: String,
    heartbeat: HeartbeatConfig,
}

impl WsConnector {
    /// Create a connector.
    ///
    /// `url` is dialed as given and must already carry the credential;
    /// `redacted_url` is the form used in logs.
    #[must_use]
    pub fn new(url: String, redacted_url: String, heartbeat: HeartbeatConfig) -> Self {
        Self {
            url,
            redacted_url,
            heartbeat,
        }
    }
}

impl std::fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnector")
            .field("url", &self.redacted_url)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

impl UpstreamConnector for WsConnector {
    fn open(&mut self, events: UpstreamEvents) -> UpstreamSession {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = SessionTask {
            url: self.url.clone(),
            redacted_url: self.redacted_url.clone(),
            heartbeat: self.heartbeat.clone(),
            events,
            commands: rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        UpstreamSession::new(tx, cancel)
    }
}

struct SessionTask {
    url: String,
    redacted_url: String,
    heartbeat: HeartbeatConfig,
    events: UpstreamEvents,
    commands: mpsc::UnboundedReceiver<UpstreamRequest>,
    cancel: CancellationToken,
}

impl SessionTask {
    async fn run(mut self) {
        let session = self.events.session();

        match self.connect_and_run().await {
            Ok(()) => {
                tracing::debug!(session = %session, "Upstream session ended");
            }
            Err(e) => {
                if self.cancel.is_cancelled() {
                    return;
                }
                tracing::warn!(session = %session, error = %e, "Upstream session closed");
                self.events.closed(e.to_string()).await;
            }
        }
    }

    /// Run until cancelled (`Ok`) or the connection fails (`Err`).
    async fn connect_and_run(&mut self) -> Result<(), UpstreamError> {
        let session = self.events.session();
        tracing::info!(session = %session, url = %self.redacted_url, "Dialing upstream");

        let (stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.url.as_str()) => {
                result.map_err(UpstreamError::Connect)?
            }
        };

        let (mut write, mut read) = stream.split();

        if self.cancel.is_cancelled() || !self.events.opened().await {
            return Ok(());
        }

        let mut heartbeat = Heartbeat::new(self.heartbeat.clone());
        let mut ticker = heartbeat.ticker();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                command = self.commands.recv() => {
                    let Some(request) = command else {
                        return Ok(());
                    };
                    tracing::debug!(
                        session = %session,
                        action = request.action.as_str(),
                        symbols = ?request.symbols,
                        "Sending upstream command"
                    );
                    write.send(codec::encode_request(&request)?).await?;
                }
                _ = ticker.tick(), if heartbeat.enabled() => {
                    if heartbeat.is_expired() {
                        return Err(UpstreamError::HeartbeatTimeout(heartbeat.silence()));
                    }
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                message = read.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(UpstreamError::StreamEnded),
                    };
                    heartbeat.record_inbound();

                    match codec::decode(message) {
                        Inbound::Text(text) => {
                            if !self.events.message(text).await {
                                return Ok(());
                            }
                        }
                        Inbound::Ping(data) => write.send(Message::Pong(data.into())).await?,
                        Inbound::Pong | Inbound::Ignored => {}
                        Inbound::Close(reason) => return Err(UpstreamError::Closed(reason)),
                    }
                }
            }
        }
    }
}
