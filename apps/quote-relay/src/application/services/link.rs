//! Upstream Link Manager
//!
//! Owns the single logical connection to the upstream quote provider:
//! - Opens sessions through an `UpstreamConnector`
//! - Tracks the reconnect attempt counter via `ReconnectPolicy`
//! - Sends subscribe/unsubscribe commands only while the link is open
//! - Remembers which symbols it believes are subscribed upstream
//!
//! Every `connect()` allocates a new `SessionId` and closes the previous
//! session, so events from superseded sessions can be recognised and
//! ignored.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::relay::RelayEvent;
use crate::application::ports::{SessionId, UpstreamConnector, UpstreamEvents, UpstreamSession};
use crate::domain::protocol::UpstreamRequest;
use crate::domain::streaming::Symbol;

// =============================================================================
// State
// =============================================================================

/// Connection state of the upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Never connected.
    #[default]
    Idle,
    /// A session is being established.
    Connecting,
    /// The session is open and carries commands.
    Open,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Attempt ceiling reached; waiting for an external trigger.
    Exhausted,
    /// The relay has shut down.
    Stopped,
}

impl LinkState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Exhausted => "exhausted",
            Self::Stopped => "stopped",
        }
    }

    /// Whether an external trigger should start a fresh connection.
    #[must_use]
    pub const fn needs_trigger(&self) -> bool {
        matches!(self, Self::Idle | Self::Exhausted)
    }
}

/// What the link decided after its session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The close came from a superseded session and was ignored.
    Stale,
    /// A reconnect should be attempted after `delay`.
    Reconnect {
        /// Session whose close scheduled this reconnect.
        session: SessionId,
        /// Backoff delay.
        delay: Duration,
        /// One-based attempt number.
        attempt: u32,
    },
    /// The attempt ceiling was reached.
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

// =============================================================================
// Upstream Link
// =============================================================================

/// Upstream link state machine.
///
/// Sends nothing on its own: the relay decides which symbols to send and
/// when. A failed send is reported as `false` and recovered by the bulk
/// resubscription on the next successful open.
#[derive(Debug)]
pub struct UpstreamLink<C> {
    connector: C,
    policy: ReconnectPolicy,
    state: LinkState,
    current: SessionId,
    session: Option<UpstreamSession>,
    believed: BTreeSet<Symbol>,
}

impl<C: UpstreamConnector> UpstreamLink<C> {
    /// Create an idle link.
    #[must_use]
    pub fn new(connector: C, reconnect: ReconnectConfig) -> Self {
        Self {
            connector,
            policy: ReconnectPolicy::new(reconnect),
            state: LinkState::Idle,
            current: SessionId(0),
            session: None,
            believed: BTreeSet::new(),
        }
    }

    /// Open a new upstream session, closing any existing one first.
    pub fn connect(&mut self, events: &mpsc::Sender<RelayEvent>) -> SessionId {
        if let Some(previous) = self.session.take() {
            tracing::debug!(session = %self.current, "Closing previous upstream session");
            previous.close();
        }

        self.current = SessionId(self.current.0 + 1);
        self.believed.clear();
        self.state = LinkState::Connecting;

        tracing::info!(
            session = %self.current,
            attempt = self.policy.attempt_count(),
            "Connecting to upstream"
        );

        let session = self
            .connector
            .open(UpstreamEvents::new(self.current, events.clone()));
        self.session = Some(session);
        self.current
    }

    /// Forget previous failures so the full attempt budget is available.
    pub const fn reset_attempts(&mut self) {
        self.policy.reset();
    }

    /// Check whether `session` is the live one.
    #[must_use]
    pub fn is_current(&self, session: SessionId) -> bool {
        session == self.current && self.session.is_some()
    }

    /// Handle the open event of `session`.
    ///
    /// Returns `false` for stale sessions.
    pub fn on_opened(&mut self, session: SessionId) -> bool {
        if !self.is_current(session) {
            return false;
        }

        self.state = LinkState::Open;
        self.policy.reset();
        tracing::info!(session = %session, "Upstream connected");
        true
    }

    /// Handle the close event of `session`.
    pub fn on_closed(&mut self, session: SessionId, reason: &str) -> CloseOutcome {
        if !self.is_current(session) {
            tracing::debug!(session = %session, reason, "Ignoring close of stale upstream session");
            return CloseOutcome::Stale;
        }

        self.session = None;
        self.believed.clear();

        if let Some(delay) = self.policy.next_delay() {
            let attempt = self.policy.attempt_count();
            self.state = LinkState::Reconnecting;
            tracing::warn!(
                session = %session,
                reason,
                attempt,
                delay_ms = delay.as_millis(),
                "Upstream disconnected, scheduling reconnect"
            );
            CloseOutcome::Reconnect {
                session,
                delay,
                attempt,
            }
        } else {
            let attempts = self.policy.attempt_count();
            self.state = LinkState::Exhausted;
            tracing::error!(
                session = %session,
                reason,
                attempts,
                "Upstream reconnect attempts exhausted"
            );
            CloseOutcome::Exhausted { attempts }
        }
    }

    /// Handle a backoff timer firing for the close of `session`.
    ///
    /// Returns `true` if a new session was opened.
    pub fn on_reconnect_due(
        &mut self,
        session: SessionId,
        events: &mpsc::Sender<RelayEvent>,
    ) -> bool {
        if session != self.current || self.state != LinkState::Reconnecting {
            return false;
        }
        self.connect(events);
        true
    }

    /// Send a subscribe command if the link is open.
    #[must_use]
    pub fn subscribe(&mut self, symbols: &BTreeSet<Symbol>) -> bool {
        let request = UpstreamRequest::subscribe(symbols.iter().cloned().collect());
        if !self.send(request) {
            return false;
        }
        self.believed.extend(symbols.iter().cloned());
        true
    }

    /// Send an unsubscribe command if the link is open.
    #[must_use]
    pub fn unsubscribe(&mut self, symbols: &BTreeSet<Symbol>) -> bool {
        let request = UpstreamRequest::unsubscribe(symbols.iter().cloned().collect());
        if !self.send(request) {
            return false;
        }
        for symbol in symbols {
            self.believed.remove(symbol);
        }
        true
    }

    fn send(&self, request: UpstreamRequest) -> bool {
        match (&self.session, self.state) {
            (Some(session), LinkState::Open) => session.send(request),
            _ => false,
        }
    }

    /// Close the session and refuse further work.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.believed.clear();
        self.state = LinkState::Stopped;
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Reconnect attempts since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.policy.attempt_count()
    }

    /// Most recently allocated session.
    #[must_use]
    pub const fn current_session(&self) -> SessionId {
        self.current
    }

    /// Symbols believed to be subscribed upstream.
    #[must_use]
    pub const fn believed(&self) -> &BTreeSet<Symbol> {
        &self.believed
    }

    /// The underlying connector.
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }
}

// =============================================================================
// Tests
// =============================================================================
