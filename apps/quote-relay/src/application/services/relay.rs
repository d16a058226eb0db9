//! Relay Core
//!
//! `RelayState` is the single owner of the subscription registry, the
//! client channels and the upstream link. It processes one `RelayEvent` at
//! a time and never blocks, so every mutation is atomic with respect to
//! every other operation of the relay.
//!
//! # Event Flow
//!
//! ```text
//! client connect ──► add_client ──► connection_success
//! client frame   ──► subscribe / unsubscribe / ping ──► upstream delta + ack
//! upstream frame ──► Tick::parse_frame ──► FanOutRouter ──► clients
//! upstream close ──► backoff timer ──► ReconnectDue ──► connect ──► bulk resubscribe
//! client close   ──► remove_client ──► orphan sweep upstream
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::link::{CloseOutcome, UpstreamLink};
use super::reconnect::ReconnectConfig;
use super::router::FanOutRouter;
use super::status::RelayStatus;
use crate::application::ports::{ClientSink, LinkEvent, SessionId, UpstreamConnector};
use crate::domain::protocol::{
    ClientRequest, INVALID_MESSAGE_FORMAT, ServerMessage, UPSTREAM_UNAVAILABLE, UpstreamAction,
};
use crate::domain::streaming::{ClientId, Symbol, Tick};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics;

// =============================================================================
// Events
// =============================================================================

/// Everything the relay reacts to.
#[derive(Debug)]
pub enum RelayEvent {
    /// A downstream connection upgrade completed.
    ClientConnected {
        /// New client identifier.
        client: ClientId,
        /// Outbound channel to the client.
        sink: Box<dyn ClientSink>,
    },
    /// A downstream client sent a text frame.
    ClientFrame {
        /// Sender.
        client: ClientId,
        /// Frame contents.
        text: String,
    },
    /// A downstream channel closed or errored.
    ClientDisconnected {
        /// Departed client.
        client: ClientId,
    },
    /// Lifecycle event from an upstream session.
    Upstream {
        /// Reporting session.
        session: SessionId,
        /// What happened.
        event: LinkEvent,
    },
    /// A backoff timer fired for the close of `session`.
    ReconnectDue {
        /// Session whose close scheduled the timer.
        session: SessionId,
    },
    /// Operator request to reconnect with a fresh attempt budget.
    Reconnect,
    /// Stop the relay.
    Shutdown,
}

/// Request to post `RelayEvent::ReconnectDue` after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectTimer {
    /// Session whose close scheduled the timer.
    pub session: SessionId,
    /// How long to wait.
    pub delay: Duration,
    /// One-based attempt number.
    pub attempt: u32,
}

// =============================================================================
// Relay State
// =============================================================================

/// Registry, client channels and upstream link under one owner.
#[derive(Debug)]
pub struct RelayState<C> {
    registry: SubscriptionRegistry,
    clients: HashMap<ClientId, Box<dyn ClientSink>>,
    link: UpstreamLink<C>,
    router: FanOutRouter,
    events: mpsc::WeakSender<RelayEvent>,
    status: Arc<RelayStatus>,
}

impl<C: UpstreamConnector> RelayState<C> {
    /// Create a relay with no clients and an idle link.
    ///
    /// `events` is the relay's own queue; upstream sessions report into it.
    #[must_use]
    pub fn new(
        connector: C,
        reconnect: ReconnectConfig,
        events: mpsc::WeakSender<RelayEvent>,
        status: Arc<RelayStatus>,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            clients: HashMap::new(),
            link: UpstreamLink::new(connector, reconnect),
            router: FanOutRouter::new(),
            events,
            status,
        }
    }

    /// Process one event.
    ///
    /// Returns a timer the caller must schedule when the upstream link
    /// needs a delayed reconnect.
    pub fn handle(&mut self, event: RelayEvent) -> Option<ReconnectTimer> {
        let timer = match event {
            RelayEvent::ClientConnected { client, sink } => {
                self.add_client(client, sink);
                None
            }
            RelayEvent::ClientFrame { client, text } => {
                self.handle_client_frame(client, &text);
                None
            }
            RelayEvent::ClientDisconnected { client } => {
                self.remove_client(client);
                None
            }
            RelayEvent::Upstream { session, event } => self.handle_upstream(session, event),
            RelayEvent::ReconnectDue { session } => {
                if let Some(events) = self.events.upgrade() {
                    self.link.on_reconnect_due(session, &events);
                }
                None
            }
            RelayEvent::Reconnect => {
                tracing::info!("Reconnect requested");
                self.trigger_connect();
                None
            }
            RelayEvent::Shutdown => {
                self.stop();
                None
            }
        };

        self.publish_status();
        timer
    }

    /// Open a new upstream session, closing any existing one.
    ///
    /// Returns `false` if the relay queue is gone or the relay stopped.
    pub fn connect(&mut self) -> bool {
        if self.is_stopped() {
            return false;
        }
        let Some(events) = self.events.upgrade() else {
            tracing::warn!("Relay queue closed, not connecting upstream");
            return false;
        };
        self.link.connect(&events);
        true
    }

    /// Reset the attempt ceiling and connect.
    fn trigger_connect(&mut self) {
        self.link.reset_attempts();
        self.connect();
    }

    // =========================================================================
    // Subscription Registry operations
    // =========================================================================

    /// Register a client with an empty subscription set and greet it.
    ///
    /// A client arriving while the link is idle or exhausted triggers a
    /// fresh connection.
    ///
    /// Ids must be unique per connection; the WebSocket endpoint mints them
    /// with `ClientId::generate` (UUID v4). A duplicate is dropped without a
    /// greeting and the registered client keeps its sink and symbols.
    pub fn add_client(&mut self, client: ClientId, sink: Box<dyn ClientSink>) {
        if self.is_stopped() {
            return;
        }
        if !self.registry.add_client(client) {
            tracing::warn!(client_id = %client, "Rejecting duplicate client id");
            return;
        }

        self.clients.insert(client, sink);
        tracing::info!(client_id = %client, clients = self.clients.len(), "Client connected");

        if !self.send_to(client, &ServerMessage::connection_success(client)) {
            return;
        }

        if self.link.state().needs_trigger() {
            tracing::info!(state = self.link.state().as_str(), "Client arrival triggers upstream connect");
            self.trigger_connect();
        }
    }

    /// Add symbols to a client's set and subscribe upstream to the newly
    /// wanted ones. The client is acknowledged with the requested symbols.
    pub fn client_subscribe(&mut self, client: ClientId, symbols: Vec<Symbol>) {
        if !self.clients.contains_key(&client) {
            return;
        }

        let changes = self.registry.subscribe(client, &symbols);
        if !changes.subscribe.is_empty() {
            if self.link.subscribe(&changes.subscribe) {
                tracing::debug!(symbols = ?changes.subscribe, "Upstream subscribe sent");
            } else {
                tracing::warn!(
                    symbols = ?changes.subscribe,
                    state = self.link.state().as_str(),
                    "Upstream subscribe not sent, deferred to next reconnect"
                );
                metrics::record_upstream_command_failure(UpstreamAction::Subscribe);
            }
        }

        tracing::debug!(client_id = %client, symbols = ?symbols, "Client subscribed");
        self.send_to(client, &ServerMessage::SubscriptionSuccess { symbols });
    }

    /// Remove symbols from a client's set and unsubscribe upstream from the
    /// ones nobody wants any more. The client is acknowledged.
    pub fn client_unsubscribe(&mut self, client: ClientId, symbols: Vec<Symbol>) {
        if !self.clients.contains_key(&client) {
            return;
        }

        let changes = self.registry.unsubscribe(client, &symbols);
        self.sweep_upstream(&changes.unsubscribe);

        tracing::debug!(client_id = %client, symbols = ?symbols, "Client unsubscribed");
        self.send_to(client, &ServerMessage::UnsubscriptionSuccess { symbols });
    }

    /// Delete a client and unsubscribe upstream from its orphaned symbols.
    pub fn remove_client(&mut self, client: ClientId) {
        let known = self.clients.remove(&client).is_some();
        let changes = self.registry.remove_client(client);
        if !known {
            return;
        }

        tracing::info!(
            client_id = %client,
            orphaned = changes.unsubscribe.len(),
            clients = self.clients.len(),
            "Client disconnected"
        );
        self.sweep_upstream(&changes.unsubscribe);
    }

    fn sweep_upstream(&mut self, orphaned: &BTreeSet<Symbol>) {
        if orphaned.is_empty() {
            return;
        }
        if self.link.unsubscribe(orphaned) {
            tracing::debug!(symbols = ?orphaned, "Upstream unsubscribe sent");
        } else {
            // A reconnect resubscribes only the wanted set, so nothing is lost
            tracing::warn!(
                symbols = ?orphaned,
                state = self.link.state().as_str(),
                "Upstream unsubscribe not sent"
            );
            metrics::record_upstream_command_failure(UpstreamAction::Unsubscribe);
        }
    }

    fn handle_client_frame(&mut self, client: ClientId, text: &str) {
        if !self.clients.contains_key(&client) {
            tracing::debug!(client_id = %client, "Frame from unknown client ignored");
            return;
        }

        match ClientRequest::parse(text) {
            Ok(ClientRequest::Subscribe { symbols }) => self.client_subscribe(client, symbols),
            Ok(ClientRequest::Unsubscribe { symbols }) => self.client_unsubscribe(client, symbols),
            Ok(ClientRequest::Ping) => {
                self.send_to(client, &ServerMessage::pong_now());
            }
            Err(e) => {
                tracing::debug!(client_id = %client, error = %e, "Malformed client frame");
                metrics::record_malformed_client_frame();
                self.send_to(client, &ServerMessage::error(INVALID_MESSAGE_FORMAT));
            }
        }
    }

    /// Send a control message, removing the client if its channel fails.
    fn send_to(&mut self, client: ClientId, message: &ServerMessage) -> bool {
        let Some(sink) = self.clients.get(&client) else {
            return false;
        };

        match sink.send(message.to_json()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(client_id = %client, error = %e, "Client send failed");
                metrics::record_client_send_failure();
                self.remove_client(client);
                false
            }
        }
    }

    // =========================================================================
    // Upstream events
    // =========================================================================

    fn handle_upstream(&mut self, session: SessionId, event: LinkEvent) -> Option<ReconnectTimer> {
        match event {
            LinkEvent::Opened => {
                if self.link.on_opened(session) {
                    metrics::set_upstream_open(true);
                    self.resubscribe_all();
                }
                None
            }
            LinkEvent::Message(text) => {
                if self.link.is_current(session) {
                    self.on_upstream_message(&text);
                }
                None
            }
            LinkEvent::Closed { reason } => match self.link.on_closed(session, &reason) {
                CloseOutcome::Stale => None,
                CloseOutcome::Reconnect {
                    session,
                    delay,
                    attempt,
                } => {
                    metrics::set_upstream_open(false);
                    metrics::record_reconnect();
                    self.status.set_error(reason);
                    Some(ReconnectTimer {
                        session,
                        delay,
                        attempt,
                    })
                }
                CloseOutcome::Exhausted { .. } => {
                    metrics::set_upstream_open(false);
                    self.status.set_error(reason);
                    self.broadcast_terminal_error();
                    None
                }
            },
        }
    }

    /// Send the whole global set on a fresh session.
    fn resubscribe_all(&mut self) {
        let wanted = self.registry.wanted();
        if wanted.is_empty() {
            return;
        }
        if self.link.subscribe(&wanted) {
            tracing::info!(symbols = wanted.len(), "Resubscribed upstream");
        } else {
            tracing::warn!(symbols = wanted.len(), "Bulk resubscribe failed");
            metrics::record_upstream_command_failure(UpstreamAction::Subscribe);
        }
    }

    fn on_upstream_message(&mut self, text: &str) {
        let ticks = match Tick::parse_frame(text) {
            Ok(ticks) => ticks,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed upstream frame");
                metrics::record_malformed_upstream_frame();
                return;
            }
        };

        for tick in &ticks {
            self.status.increment_ticks_received();
            metrics::record_tick_received();

            let outcome = self.router.route(tick, &self.registry, &self.clients);
            self.status.add_ticks_forwarded(outcome.delivered as u64);

            for client in outcome.failed {
                metrics::record_client_send_failure();
                self.remove_client(client);
            }
        }
    }

    /// Best-effort notice to every client; send failures are ignored.
    fn broadcast_terminal_error(&self) {
        let frame = ServerMessage::error(UPSTREAM_UNAVAILABLE).to_json();
        for sink in self.clients.values() {
            let _ = sink.send(frame.clone());
        }
        tracing::warn!(clients = self.clients.len(), "Notified clients of upstream failure");
    }

    // =========================================================================
    // Lifecycle and inspection
    // =========================================================================

    /// Close the upstream session and drop every client channel.
    pub fn stop(&mut self) {
        if self.is_stopped() {
            return;
        }
        self.link.stop();
        self.clients.clear();
        self.registry = SubscriptionRegistry::new();
        metrics::set_upstream_open(false);
        tracing::info!("Relay stopped");
    }

    /// Whether `stop` has run.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.link.state() == super::link::LinkState::Stopped
    }

    /// Publish the status snapshot and gauges.
    pub fn publish_status(&self) {
        let stats = self.registry.stats();
        self.status.set_link(self.link.state(), self.link.attempts());
        self.status.set_counts(self.clients.len(), stats.symbol_count);
        metrics::set_connected_clients(self.clients.len());
        metrics::set_subscribed_symbols(stats.symbol_count);
    }

    /// The subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// The upstream link.
    #[must_use]
    pub const fn link(&self) -> &UpstreamLink<C> {
        &self.link
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

// =============================================================================
// Test doubles
// =============================================================================


// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::testing::{FakeConnector, FakeSink};
    use super::*;
    use crate::application::services::link::LinkState;
    use crate::domain::protocol::UpstreamRequest;

    struct Harness {
        relay: RelayState<FakeConnector>,
        connector: FakeConnector,
        status: Arc<RelayStatus>,
        _tx: mpsc::Sender<RelayEvent>,
        _rx: mpsc::Receiver<RelayEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::channel(64);
            let connector = FakeConnector::default();
            let status = Arc::new(RelayStatus::new());
            let relay = RelayState::new(
                connector.clone(),
                ReconnectConfig::default(),
                tx.downgrade(),
                Arc::clone(&status),
            );
            Self {
                relay,
                connector,
                status,
                _tx: tx,
                _rx: rx,
            }
        }

        /// Harness with an open upstream session.
        fn open() -> Self {
            let mut h = Self::new();
            assert!(h.relay.connect());
            h.opened();
            h
        }

        fn session(&self) -> SessionId {
            self.relay.link().current_session()
        }

        fn opened(&mut self) {
            let session = self.session();
            self.relay.handle(RelayEvent::Upstream {
                session,
                event: LinkEvent::Opened,
            });
        }

        fn closed(&mut self) -> Option<ReconnectTimer> {
            let session = self.session();
            self.relay.handle(RelayEvent::Upstream {
                session,
                event: LinkEvent::Closed {
                    reason: "connection reset".to_string(),
                },
            })
        }

        fn upstream(&mut self, text: &str) {
            let session = self.session();
            self.relay.handle(RelayEvent::Upstream {
                session,
                event: LinkEvent::Message(text.to_string()),
            });
        }

        fn client(&mut self) -> (ClientId, FakeSink) {
            let id = ClientId::generate();
            let sink = FakeSink::default();
            self.relay.handle(RelayEvent::ClientConnected {
                client: id,
                sink: Box::new(sink.clone()),
            });
            (id, sink)
        }

        fn frame(&mut self, client: ClientId, text: &str) {
            self.relay.handle(RelayEvent::ClientFrame {
                client,
                text: text.to_string(),
            });
        }

        fn subscribe(&mut self, client: ClientId, symbols: &[&str]) {
            let text = serde_json::json!({"action": "subscribe", "symbols": symbols}).to_string();
            self.frame(client, &text);
        }

        fn unsubscribe(&mut self, client: ClientId, symbols: &[&str]) {
            let text = serde_json::json!({"action": "unsubscribe", "symbols": symbols}).to_string();
            self.frame(client, &text);
        }

        fn disconnect(&mut self, client: ClientId) {
            self.relay.handle(RelayEvent::ClientDisconnected { client });
        }

        fn upstream_commands(&self) -> Vec<UpstreamRequest> {
            self.connector.last().drain()
        }
    }

    fn sub(symbols: &[&str]) -> UpstreamRequest {
        UpstreamRequest::subscribe(symbols.iter().map(|s| (*s).to_string()).collect())
    }

    fn unsub(symbols: &[&str]) -> UpstreamRequest {
        UpstreamRequest::unsubscribe(symbols.iter().map(|s| (*s).to_string()).collect())
    }

    fn types(sink: &FakeSink) -> Vec<String> {
        sink.messages()
            .iter()
            .map(|m| m["type"].as_str().unwrap_or("tick").to_string())
            .collect()
    }

    #[test]
    fn two_clients_share_upstream_subscriptions() {
        let mut h = Harness::open();
        let (c1, _) = h.client();
        let (c2, _) = h.client();

        h.subscribe(c1, &["AAPL", "MSFT"]);
        assert_eq!(h.upstream_commands(), vec![sub(&["AAPL", "MSFT"])]);

        h.subscribe(c2, &["MSFT", "TSLA"]);
        assert_eq!(h.upstream_commands(), vec![sub(&["TSLA"])]);

        h.disconnect(c1);
        assert_eq!(h.upstream_commands(), vec![unsub(&["AAPL"])]);

        assert_eq!(
            h.relay.link().believed(),
            &h.relay.registry().wanted(),
            "believed set tracks the global set"
        );
    }

    #[test]
    fn greeting_carries_client_id() {
        let mut h = Harness::open();
        let (id, sink) = h.client();

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "connection_success");
        assert_eq!(messages[0]["clientId"], id.to_string());
    }

    #[test]
    fn acknowledgement_echoes_request_even_when_already_wanted() {
        let mut h = Harness::open();
        let (c1, _) = h.client();
        let (c2, sink) = h.client();
        h.subscribe(c1, &["AAPL"]);
        h.upstream_commands();
        sink.clear();

        h.subscribe(c2, &["AAPL", "AAPL"]);

        assert!(h.upstream_commands().is_empty());
        assert_eq!(
            sink.messages(),
            vec![serde_json::json!({"type": "subscription_success", "symbols": ["AAPL", "AAPL"]})]
        );
    }

    #[test]
    fn resubscribing_same_symbol_sends_nothing_upstream() {
        let mut h = Harness::open();
        let (c1, sink) = h.client();
        h.subscribe(c1, &["AAPL"]);
        h.upstream_commands();

        h.subscribe(c1, &["AAPL"]);

        assert!(h.upstream_commands().is_empty());
        assert_eq!(types(&sink).last().unwrap(), "subscription_success");
    }

    #[test]
    fn unsubscribe_only_sweeps_orphans() {
        let mut h = Harness::open();
        let (c1, sink) = h.client();
        let (c2, _) = h.client();
        h.subscribe(c1, &["AAPL", "MSFT"]);
        h.subscribe(c2, &["MSFT"]);
        h.upstream_commands();
        sink.clear();

        h.unsubscribe(c1, &["AAPL", "MSFT", "GOOG"]);

        assert_eq!(h.upstream_commands(), vec![unsub(&["AAPL"])]);
        assert_eq!(
            sink.messages(),
            vec![serde_json::json!({
                "type": "unsubscription_success",
                "symbols": ["AAPL", "MSFT", "GOOG"]
            })]
        );

        // Last holder leaves: exactly one unsubscribe for MSFT
        h.unsubscribe(c2, &["MSFT"]);
        assert_eq!(h.upstream_commands(), vec![unsub(&["MSFT"])]);
        h.unsubscribe(c2, &["MSFT"]);
        assert!(h.upstream_commands().is_empty());
    }

    #[test]
    fn ticks_reach_only_interested_clients() {
        let mut h = Harness::open();
        let (c1, s1) = h.client();
        let (c2, s2) = h.client();
        let (_c3, s3) = h.client();
        h.subscribe(c1, &["AAPL"]);
        h.subscribe(c2, &["MSFT", "AAPL"]);
        for s in [&s1, &s2, &s3] {
            s.clear();
        }

        h.upstream(r#"[{"s":"AAPL","p":1.0},{"s":"MSFT","p":2.0},{"s":"NVDA","p":3.0}]"#);

        assert_eq!(s1.frames(), vec![r#"{"s":"AAPL","p":1.0}"#]);
        assert_eq!(
            s2.frames(),
            vec![r#"{"s":"AAPL","p":1.0}"#, r#"{"s":"MSFT","p":2.0}"#]
        );
        assert!(s3.frames().is_empty());
        assert_eq!(h.status.snapshot().ticks_received, 3);
        assert_eq!(h.status.snapshot().ticks_forwarded, 3);
    }

    #[test]
    fn acknowledgement_precedes_ticks() {
        let mut h = Harness::open();
        let (c1, sink) = h.client();

        h.subscribe(c1, &["AAPL"]);
        h.upstream(r#"{"s":"AAPL","p":1.0}"#);

        assert_eq!(
            types(&sink),
            vec!["connection_success", "subscription_success", "tick"]
        );
    }

    #[test]
    fn failed_delivery_removes_client_and_sweeps() {
        let mut h = Harness::open();
        let (c1, s1) = h.client();
        let (c2, s2) = h.client();
        h.subscribe(c1, &["AAPL", "TSLA"]);
        h.subscribe(c2, &["AAPL"]);
        h.upstream_commands();
        s1.fail();
        s2.clear();

        h.upstream(r#"{"s":"AAPL","p":1.0}"#);

        assert_eq!(s2.frames().len(), 1);
        assert!(!h.relay.registry().contains_client(c1));
        assert_eq!(h.relay.client_count(), 1);
        assert_eq!(h.upstream_commands(), vec![unsub(&["TSLA"])]);
    }

    #[test]
    fn malformed_client_frame_gets_error_and_stays_connected() {
        let mut h = Harness::open();
        let (c1, sink) = h.client();
        sink.clear();

        h.frame(c1, "not json");
        h.frame(c1, r#"{"action":"dance"}"#);

        assert_eq!(
            sink.messages(),
            vec![
                serde_json::json!({"type": "error", "message": "Invalid message format"}),
                serde_json::json!({"type": "error", "message": "Invalid message format"}),
            ]
        );
        assert!(h.relay.registry().contains_client(c1));
    }

    #[test]
    fn ping_gets_pong() {
        let mut h = Harness::open();
        let (c1, sink) = h.client();
        sink.clear();

        h.frame(c1, r#"{"action":"ping"}"#);

        let messages = sink.messages();
        assert_eq!(messages[0]["type"], "pong");
        assert!(messages[0]["timestamp"].is_i64());
    }

    #[test]
    fn malformed_upstream_frame_is_discarded() {
        let mut h = Harness::open();
        let (c1, sink) = h.client();
        h.subscribe(c1, &["AAPL"]);
        sink.clear();

        h.upstream("{broken");
        h.upstream("42");

        assert!(sink.frames().is_empty());
        assert_eq!(h.relay.link().state(), LinkState::Open);
        assert_eq!(h.connector.opened(), 1);
    }

    #[test]
    fn reconnect_resubscribes_current_global_set() {
        let mut h = Harness::open();
        let (c1, _) = h.client();
        let (c2, s2) = h.client();
        h.subscribe(c1, &["AAPL", "MSFT"]);
        h.subscribe(c2, &["TSLA"]);

        let timer = h.closed().unwrap();
        assert_eq!(timer.delay, Duration::from_millis(3000));
        assert_eq!(timer.attempt, 1);

        // Changes during the outage are acknowledged but not sent
        s2.clear();
        h.subscribe(c2, &["GOOG"]);
        h.unsubscribe(c1, &["AAPL"]);
        assert_eq!(types(&s2), vec!["subscription_success"]);

        h.relay.handle(RelayEvent::ReconnectDue {
            session: timer.session,
        });
        assert_eq!(h.connector.opened(), 2);
        h.opened();

        assert_eq!(h.upstream_commands(), vec![sub(&["GOOG", "MSFT", "TSLA"])]);
        assert_eq!(h.relay.link().attempts(), 0);
    }

    #[test]
    fn open_with_no_clients_sends_nothing() {
        let h = Harness::open();
        assert!(h.upstream_commands().is_empty());
    }

    #[test]
    fn backoff_grows_then_exhausts_with_single_notice() {
        let mut h = Harness::open();
        let (_c1, s1) = h.client();
        let (_c2, s2) = h.client();

        for n in 0..10 {
            let timer = h.closed().expect("reconnect scheduled");
            let expected = 3000.0 * 1.5f64.powi(n);
            assert_eq!(timer.delay.as_millis(), expected.round() as u128);
            h.relay.handle(RelayEvent::ReconnectDue {
                session: timer.session,
            });
        }
        s1.clear();
        s2.clear();

        assert!(h.closed().is_none());
        assert_eq!(h.relay.link().state(), LinkState::Exhausted);
        for sink in [&s1, &s2] {
            assert_eq!(
                sink.messages(),
                vec![serde_json::json!({"type": "error", "message": UPSTREAM_UNAVAILABLE})]
            );
        }
        assert_eq!(h.connector.opened(), 11);
        assert_eq!(h.status.snapshot().link_state, LinkState::Exhausted);
    }

    #[test]
    fn client_arrival_after_exhaustion_reconnects() {
        let mut h = Harness::new();
        h.relay.connect();
        for _ in 0..10 {
            let timer = h.closed().unwrap();
            h.relay.handle(RelayEvent::ReconnectDue {
                session: timer.session,
            });
        }
        assert!(h.closed().is_none());
        let opened = h.connector.opened();

        h.client();

        assert_eq!(h.connector.opened(), opened + 1);
        assert_eq!(h.relay.link().state(), LinkState::Connecting);
        assert_eq!(h.relay.link().attempts(), 0);
    }

    #[test]
    fn first_client_connects_idle_link() {
        let mut h = Harness::new();
        assert_eq!(h.connector.opened(), 0);

        h.client();
        h.client();

        assert_eq!(h.connector.opened(), 1);
    }

    #[test]
    fn operator_reconnect_resets_budget() {
        let mut h = Harness::open();
        h.closed();
        assert_eq!(h.relay.link().attempts(), 1);

        h.relay.handle(RelayEvent::Reconnect);

        assert_eq!(h.relay.link().attempts(), 0);
        assert_eq!(h.connector.opened(), 2);
    }

    #[test]
    fn stale_session_traffic_is_ignored() {
        let mut h = Harness::open();
        let (c1, sink) = h.client();
        h.subscribe(c1, &["AAPL"]);
        let old = h.session();
        h.relay.connect();
        sink.clear();

        h.relay.handle(RelayEvent::Upstream {
            session: old,
            event: LinkEvent::Message(r#"{"s":"AAPL"}"#.to_string()),
        });
        let timer = h.relay.handle(RelayEvent::Upstream {
            session: old,
            event: LinkEvent::Closed {
                reason: "superseded".to_string(),
            },
        });

        assert!(sink.frames().is_empty());
        assert!(timer.is_none());
        assert!(h.connector.session(0).is_closed());
        assert_eq!(h.relay.link().state(), LinkState::Connecting);
    }

    #[test]
    fn duplicate_client_id_is_rejected() {
        let mut h = Harness::open();
        let (id, first) = h.client();
        let second = FakeSink::default();

        h.relay.handle(RelayEvent::ClientConnected {
            client: id,
            sink: Box::new(second.clone()),
        });

        assert_eq!(h.relay.client_count(), 1);
        assert!(second.frames().is_empty());
        assert_eq!(first.frames().len(), 1);

        // The original registration still receives its acks
        h.subscribe(id, &["AAPL"]);
        assert_eq!(first.frames().len(), 2);
        assert!(second.frames().is_empty());
    }

    #[test]
    fn frames_from_unknown_clients_are_ignored() {
        let mut h = Harness::open();
        h.subscribe(ClientId::generate(), &["AAPL"]);

        assert!(h.relay.registry().wanted().is_empty());
        assert!(h.upstream_commands().is_empty());
    }

    #[test]
    fn failed_acknowledgement_removes_client() {
        let mut h = Harness::open();
        let (c1, sink) = h.client();
        sink.fail();

        h.subscribe(c1, &["AAPL"]);

        assert!(!h.relay.registry().contains_client(c1));
        assert!(h.relay.registry().wanted().is_empty());
        assert_eq!(h.upstream_commands(), vec![sub(&["AAPL"]), unsub(&["AAPL"])]);
    }

    #[test]
    fn shutdown_closes_everything() {
        let mut h = Harness::open();
        let (c1, _) = h.client();
        h.subscribe(c1, &["AAPL"]);

        h.relay.handle(RelayEvent::Shutdown);

        assert!(h.relay.is_stopped());
        assert_eq!(h.relay.client_count(), 0);
        assert!(h.connector.last().is_closed());

        // Stopped relay refuses new clients and connections
        h.client();
        assert_eq!(h.relay.client_count(), 0);
        assert!(!h.relay.connect());
    }
}
