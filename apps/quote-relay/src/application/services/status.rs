//! Relay Status
//!
//! Snapshot of relay state published by the actor after every event and
//! read by the health endpoint without touching actor-owned state.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::link::LinkState;

/// Shared, lock-light view of the relay.
#[derive(Debug, Default)]
pub struct RelayStatus {
    link_state: RwLock<LinkState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    clients: AtomicUsize,
    symbols: AtomicUsize,
    ticks_received: AtomicU64,
    ticks_forwarded: AtomicU64,
}

impl RelayStatus {
    /// Create an idle status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the link state and attempt counter.
    pub fn set_link(&self, state: LinkState, attempts: u32) {
        let previous = std::mem::replace(&mut *self.link_state.write(), state);
        if state == LinkState::Open && previous != LinkState::Open {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    /// Record the latest upstream failure.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Update client and symbol counts.
    pub fn set_counts(&self, clients: usize, symbols: usize) {
        self.clients.store(clients, Ordering::Relaxed);
        self.symbols.store(symbols, Ordering::Relaxed);
    }

    /// Count an upstream tick.
    pub fn increment_ticks_received(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count deliveries to clients.
    pub fn add_ticks_forwarded(&self, count: u64) {
        self.ticks_forwarded.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current link state.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        *self.link_state.read()
    }

    /// Capture a consistent-enough copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            link_state: self.link_state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            clients: self.clients.load(Ordering::Relaxed),
            symbols: self.symbols.load(Ordering::Relaxed),
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            ticks_forwarded: self.ticks_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `RelayStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Upstream link state.
    pub link_state: LinkState,
    /// When the link last opened.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Latest upstream failure since the last open.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last open.
    pub reconnect_attempts: u32,
    /// Connected clients.
    pub clients: usize,
    /// Globally wanted symbols.
    pub symbols: usize,
    /// Ticks received from upstream.
    pub ticks_received: u64,
    /// Tick deliveries to clients.
    pub ticks_forwarded: u64,
}
