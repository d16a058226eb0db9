//! Relay Actor
//!
//! Runs `RelayState` on its own task. Every input (client frames, upstream
//! lifecycle, backoff timers, operator commands) is posted to one bounded
//! queue and handled in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::reconnect::ReconnectConfig;
use super::relay::{ReconnectTimer, RelayEvent, RelayState};
use super::status::RelayStatus;
use crate::application::ports::{ClientSink, UpstreamConnector};
use crate::domain::streaming::ClientId;

/// Default capacity of the relay event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 4096;

/// Settings for the relay actor.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Upstream backoff.
    pub reconnect: ReconnectConfig,
    /// Capacity of the event queue.
    pub event_queue_capacity: usize,
    /// Connect upstream at startup rather than on the first client.
    pub connect_on_start: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            connect_on_start: true,
        }
    }
}

/// The relay task is no longer accepting events.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("relay has stopped")]
pub struct RelayStopped;

/// Cloneable handle for posting events to the relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayEvent>,
    status: Arc<RelayStatus>,
}

impl RelayHandle {
    async fn post(&self, event: RelayEvent) -> Result<(), RelayStopped> {
        self.tx.send(event).await.map_err(|_| RelayStopped)
    }

    /// Register a newly upgraded client.
    ///
    /// # Errors
    ///
    /// Returns `RelayStopped` if the relay task has exited.
    pub async fn client_connected(
        &self,
        client: ClientId,
        sink: Box<dyn ClientSink>,
    ) -> Result<(), RelayStopped> {
        self.post(RelayEvent::ClientConnected { client, sink }).await
    }

    /// Forward a client text frame.
    ///
    /// # Errors
    ///
    /// Returns `RelayStopped` if the relay task has exited.
    pub async fn client_frame(&self, client: ClientId, text: String) -> Result<(), RelayStopped> {
        self.post(RelayEvent::ClientFrame { client, text }).await
    }

    /// Report that a client's connection ended.
    ///
    /// # Errors
    ///
    /// Returns `RelayStopped` if the relay task has exited.
    pub async fn client_disconnected(&self, client: ClientId) -> Result<(), RelayStopped> {
        self.post(RelayEvent::ClientDisconnected { client }).await
    }

    /// Reconnect upstream with a fresh attempt budget.
    ///
    /// # Errors
    ///
    /// Returns `RelayStopped` if the relay task has exited.
    pub async fn reconnect(&self) -> Result<(), RelayStopped> {
        self.post(RelayEvent::Reconnect).await
    }

    /// Ask the relay to stop. Idempotent.
    pub async fn stop(&self) {
        let _ = self.post(RelayEvent::Shutdown).await;
    }

    /// Shared status snapshot.
    #[must_use]
    pub const fn status(&self) -> &Arc<RelayStatus> {
        &self.status
    }

    /// Whether the relay task is still accepting events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn the relay actor.
///
/// The returned join handle completes after a `Shutdown` event has been
/// processed.
pub fn spawn_relay<C>(connector: C, settings: RelaySettings) -> (RelayHandle, JoinHandle<()>)
where
    C: UpstreamConnector + 'static,
{
    let (tx, rx) = mpsc::channel(settings.event_queue_capacity.max(1));
    let status = Arc::new(RelayStatus::new());

    let state = RelayState::new(
        connector,
        settings.reconnect,
        tx.downgrade(),
        Arc::clone(&status),
    );
    let task = tokio::spawn(run(state, rx, tx.downgrade(), settings.connect_on_start));

    (RelayHandle { tx, status }, task)
}

async fn run<C: UpstreamConnector>(
    mut state: RelayState<C>,
    mut rx: mpsc::Receiver<RelayEvent>,
    timers: mpsc::WeakSender<RelayEvent>,
    connect_on_start: bool,
) {
    tracing::info!("Relay started");

    if connect_on_start {
        state.connect();
        state.publish_status();
    }

    while let Some(event) = rx.recv().await {
        let shutdown = matches!(event, RelayEvent::Shutdown);

        if let Some(timer) = state.handle(event) {
            schedule_reconnect(timer, timers.clone());
        }

        if shutdown {
            break;
        }
    }

    rx.close();
    state.stop();
    state.publish_status();
}

/// Post `ReconnectDue` after the backoff delay.
///
/// Timers are never cancelled; the link ignores timers whose session has
/// been superseded.
fn schedule_reconnect(timer: ReconnectTimer, tx: mpsc::WeakSender<RelayEvent>) {
    tokio::spawn(async move {
        tokio::time::sleep(timer.delay).await;
        if let Some(tx) = tx.upgrade() {
            let _ = tx
                .send(RelayEvent::ReconnectDue {
                    session: timer.session,
                })
                .await;
        }
    });
}
