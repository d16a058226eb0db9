//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ClientSink`: Non-blocking send channel to one downstream client
//! - `UpstreamConnector`: Opens sessions to the upstream quote provider
//!
//! Both are called from the relay actor, so neither may block.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::relay::RelayEvent;
use crate::domain::protocol::UpstreamRequest;

// =============================================================================
// Client Sink
// =============================================================================

/// Error returned when a frame cannot be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The client's channel is closed.
    #[error("client channel closed")]
    Closed,
    /// The client's outbound queue is full.
    #[error("client channel full")]
    Full,
}

/// Outbound half of a downstream client connection.
pub trait ClientSink: Send + std::fmt::Debug {
    /// Queue a text frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the frame cannot be queued. The relay treats
    /// any error as an implicit disconnect.
    fn send(&self, frame: String) -> Result<(), SinkError>;
}

// =============================================================================
// Upstream Connector
// =============================================================================

/// Identifies one upstream connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle events reported by an upstream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The connection is open and can carry commands.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The connection ended or could not be established.
    Closed {
        /// Why the session ended.
        reason: String,
    },
}

/// Reports a session's lifecycle back to the relay queue.
#[derive(Debug, Clone)]
pub struct UpstreamEvents {
    session: SessionId,
    tx: mpsc::Sender<RelayEvent>,
}

impl UpstreamEvents {
    /// Create a reporter for `session`.
    #[must_use]
    pub const fn new(session: SessionId, tx: mpsc::Sender<RelayEvent>) -> Self {
        Self { session, tx }
    }

    /// Session this reporter belongs to.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Report a lifecycle event.
    ///
    /// Returns `false` once the relay has stopped.
    pub async fn emit(&self, event: LinkEvent) -> bool {
        self.tx
            .send(RelayEvent::Upstream {
                session: self.session,
                event,
            })
            .await
            .is_ok()
    }

    /// Report that the connection opened.
    pub async fn opened(&self) -> bool {
        self.emit(LinkEvent::Opened).await
    }

    /// Report an inbound text frame.
    pub async fn message(&self, text: String) -> bool {
        self.emit(LinkEvent::Message(text)).await
    }

    /// Report that the connection ended.
    pub async fn closed(&self, reason: impl Into<String>) -> bool {
        self.emit(LinkEvent::Closed {
            reason: reason.into(),
        })
        .await
    }
}

/// Command handle for one upstream session.
#[derive(Debug)]
pub struct UpstreamSession {
    commands: mpsc::UnboundedSender<UpstreamRequest>,
    cancel: CancellationToken,
}

impl UpstreamSession {
    /// Create a session handle.
    #[must_use]
    pub const fn new(
        commands: mpsc::UnboundedSender<UpstreamRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self { commands, cancel }
    }

    /// Queue a command for the connection writer.
    ///
    /// Returns `false` if the session's writer has gone away.
    #[must_use]
    pub fn send(&self, request: UpstreamRequest) -> bool {
        self.commands.send(request).is_ok()
    }

    /// Close the connection. The session emits no further events.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Opens connections to the upstream quote provider.
pub trait UpstreamConnector: Send {
    /// Begin opening a session.
    ///
    /// Must return immediately; the outcome is reported asynchronously
    /// through `events` (`Opened` on success, `Closed` on failure or end).
    fn open(&mut self, events: UpstreamEvents) -> UpstreamSession;
}
