//! Fan-out Router
//!
//! Stateless dispatch of each upstream tick to the clients whose
//! subscription set contains the tick's symbol.

use std::collections::HashMap;

use crate::application::ports::ClientSink;
use crate::domain::streaming::{ClientId, Tick};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics::{self, DropReason};

/// Result of routing one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Clients the tick was queued for.
    pub delivered: usize,
    /// Clients whose send failed; the caller must remove them.
    pub failed: Vec<ClientId>,
}

/// Routes ticks to interested clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanOutRouter;

impl FanOutRouter {
    /// Create a router.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Deliver `tick` verbatim to every client subscribed to its symbol.
    ///
    /// A failing client never stops delivery to the others. Ticks without
    /// a symbol cannot be routed and are dropped.
    #[must_use]
    pub fn route(
        &self,
        tick: &Tick,
        registry: &SubscriptionRegistry,
        clients: &HashMap<ClientId, Box<dyn ClientSink>>,
    ) -> RouteOutcome {
        let Some(symbol) = tick.symbol() else {
            tracing::trace!("Dropping tick without symbol");
            metrics::record_tick_dropped(DropReason::NoSymbol);
            return RouteOutcome::default();
        };

        let mut outcome = RouteOutcome::default();

        for client in registry.subscribers(symbol) {
            let Some(sink) = clients.get(&client) else {
                continue;
            };

            match sink.send(tick.payload().to_string()) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    tracing::warn!(client_id = %client, symbol, error = %e, "Tick delivery failed");
                    outcome.failed.push(client);
                }
            }
        }

        if outcome.delivered == 0 && outcome.failed.is_empty() {
            metrics::record_tick_dropped(DropReason::NoSubscribers);
        } else {
            metrics::record_ticks_forwarded(outcome.delivered as u64);
        }

        outcome
    }
}
