//! Upstream Heartbeat
//!
//! Pings the upstream connection on a fixed interval and declares it dead
//! once nothing (data, ping or pong) has arrived for the timeout period.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages (zero disables the heartbeat).
    pub ping_interval: Duration,
    /// Inbound silence after which the connection is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

impl HeartbeatConfig {
    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub const fn from_upstream_settings(settings: &crate::UpstreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            timeout: settings.heartbeat_timeout,
        }
    }

    /// Whether pings are sent at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

/// Liveness tracker for one connection.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_inbound: Instant,
}

impl Heartbeat {
    /// Start tracking from now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_inbound: Instant::now(),
        }
    }

    /// Whether pings are sent at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled()
    }

    /// Ticker that fires every ping interval, first after one full interval.
    ///
    /// A disabled heartbeat still gets a ticker; callers gate on `enabled`.
    #[must_use]
    pub fn ticker(&self) -> Interval {
        let period = if self.enabled() {
            self.config.ping_interval
        } else {
            Duration::from_secs(3600)
        };
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Record any inbound frame.
    pub fn record_inbound(&mut self) {
        self.last_inbound = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_inbound.elapsed()
    }

    /// Whether the connection has been silent for longer than the timeout.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.silence() >= self.config.timeout
    }

    /// The configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.config.timeout
    }
}
