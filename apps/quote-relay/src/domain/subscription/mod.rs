//! Subscription Registry
//!
//! Tracks which symbols each downstream client wants and derives the global
//! subscription set as the union across all clients.
//!
//! # Design
//!
//! The registry keeps two views of the same relation:
//! - Per-client symbol sets (what a client asked for)
//! - A symbol → clients reverse index (who wants a symbol)
//!
//! The key set of the reverse index *is* the global subscription set: a
//! symbol is present if and only if at least one registered client wants
//! it. Every mutation returns the minimal upstream delta as
//! `SubscriptionChanges`, so multiple clients can share a symbol while
//! only one upstream subscription exists.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::streaming::{ClientId, Symbol};

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
///
/// Symbols are kept ordered so upstream commands are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols that became globally wanted.
    pub subscribe: BTreeSet<Symbol>,
    /// Symbols that are no longer wanted by anyone.
    pub unsubscribe: BTreeSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: BTreeSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: BTreeSet::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Single source of truth for "who wants what".
///
/// Not internally synchronized: the relay actor owns it and is its sole
/// mutator.
///
/// # Example
///
/// ```rust
/// use quote_relay::domain::streaming::ClientId;
/// use quote_relay::domain::subscription::SubscriptionRegistry;
///
/// let mut registry = SubscriptionRegistry::new();
/// let (a, b) = (ClientId::generate(), ClientId::generate());
/// registry.add_client(a);
/// registry.add_client(b);
///
/// // Client A subscribes to AAPL - upstream subscribe needed
/// let changes = registry.subscribe(a, &["AAPL".to_string()]);
/// assert!(changes.subscribe.contains("AAPL"));
///
/// // Client B also subscribes - no upstream change needed
/// let changes = registry.subscribe(b, &["AAPL".to_string()]);
/// assert!(changes.is_empty());
///
/// // Client A leaves - still wanted by B
/// let changes = registry.remove_client(a);
/// assert!(changes.is_empty());
///
/// // Client B unsubscribes - now unsubscribe upstream
/// let changes = registry.unsubscribe(b, &["AAPL".to_string()]);
/// assert!(changes.unsubscribe.contains("AAPL"));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Map from client ID to the symbols it wants.
    client_symbols: HashMap<ClientId, HashSet<Symbol>>,
    /// Map from symbol to the clients wanting it. Never holds empty sets.
    symbol_clients: HashMap<Symbol, HashSet<ClientId>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client with an empty symbol set.
    ///
    /// Returns `false` if the client was already registered.
    pub fn add_client(&mut self, client: ClientId) -> bool {
        if self.client_symbols.contains_key(&client) {
            return false;
        }
        self.client_symbols.insert(client, HashSet::new());
        true
    }

    /// Check whether a client is registered.
    #[must_use]
    pub fn contains_client(&self, client: ClientId) -> bool {
        self.client_symbols.contains_key(&client)
    }

    /// Add symbols to a client's set.
    ///
    /// Returns the symbols that were not globally wanted before this call.
    /// Unknown clients are ignored.
    pub fn subscribe(&mut self, client: ClientId, symbols: &[Symbol]) -> SubscriptionChanges {
        let Some(client_set) = self.client_symbols.get_mut(&client) else {
            return SubscriptionChanges::default();
        };

        let mut newly_wanted = Vec::new();

        for symbol in symbols {
            // Skip if client already subscribed
            if !client_set.insert(symbol.clone()) {
                continue;
            }

            let wanting = self.symbol_clients.entry(symbol.clone()).or_default();
            wanting.insert(client);

            // First client - needs upstream subscribe
            if wanting.len() == 1 {
                newly_wanted.push(symbol.clone());
            }
        }

        SubscriptionChanges::subscribe_only(newly_wanted)
    }

    /// Remove symbols from a client's set.
    ///
    /// Returns the symbols no remaining client wants. Symbols the client
    /// never had are ignored.
    pub fn unsubscribe(&mut self, client: ClientId, symbols: &[Symbol]) -> SubscriptionChanges {
        let Some(client_set) = self.client_symbols.get_mut(&client) else {
            return SubscriptionChanges::default();
        };

        let mut orphaned = Vec::new();

        for symbol in symbols {
            // Skip if client wasn't subscribed
            if !client_set.remove(symbol) {
                continue;
            }

            if Self::release(&mut self.symbol_clients, symbol, client) {
                orphaned.push(symbol.clone());
            }
        }

        SubscriptionChanges::unsubscribe_only(orphaned)
    }

    /// Delete a client and sweep its symbols.
    ///
    /// Returns the symbols that became globally orphaned.
    pub fn remove_client(&mut self, client: ClientId) -> SubscriptionChanges {
        let Some(client_set) = self.client_symbols.remove(&client) else {
            return SubscriptionChanges::default();
        };

        let orphaned = client_set
            .into_iter()
            .filter(|symbol| Self::release(&mut self.symbol_clients, symbol, client))
            .collect::<Vec<_>>();

        SubscriptionChanges::unsubscribe_only(orphaned)
    }

    /// Drop `client` from a symbol's wanting set.
    ///
    /// Returns `true` if nobody wants the symbol afterwards.
    fn release(
        index: &mut HashMap<Symbol, HashSet<ClientId>>,
        symbol: &str,
        client: ClientId,
    ) -> bool {
        let Some(wanting) = index.get_mut(symbol) else {
            return false;
        };
        wanting.remove(&client);
        if wanting.is_empty() {
            index.remove(symbol);
            return true;
        }
        false
    }

    /// Global subscription set, ordered.
    #[must_use]
    pub fn wanted(&self) -> BTreeSet<Symbol> {
        self.symbol_clients.keys().cloned().collect()
    }

    /// Check whether any client wants a symbol.
    #[must_use]
    pub fn is_wanted(&self, symbol: &str) -> bool {
        self.symbol_clients.contains_key(symbol)
    }

    /// Clients wanting a symbol.
    pub fn subscribers<'a>(&'a self, symbol: &str) -> impl Iterator<Item = ClientId> + 'a {
        self.symbol_clients
            .get(symbol)
            .into_iter()
            .flat_map(|clients| clients.iter().copied())
    }

    /// Symbols for a specific client, ordered.
    #[must_use]
    pub fn client_symbols(&self, client: ClientId) -> BTreeSet<Symbol> {
        self.client_symbols
            .get(&client)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Registered client IDs.
    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.client_symbols.keys().copied()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            symbol_count: self.symbol_clients.len(),
            client_count: self.client_symbols.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of globally wanted symbols.
    pub symbol_count: usize,
    /// Number of registered clients.
    pub client_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn syms(symbols: &[&str]) -> Vec<Symbol> {
        symbols.iter().map(|s| (*s).to_string()).collect()
    }

    fn set(symbols: &[&str]) -> BTreeSet<Symbol> {
        symbols.iter().map(|s| (*s).to_string()).collect()
    }

    fn registry_with(n: usize) -> (SubscriptionRegistry, Vec<ClientId>) {
        let mut registry = SubscriptionRegistry::new();
        let ids: Vec<_> = (0..n).map(|_| ClientId::generate()).collect();
        for id in &ids {
            registry.add_client(*id);
        }
        (registry, ids)
    }

    #[test]
    fn new_client_starts_empty() {
        let (registry, ids) = registry_with(1);

        assert!(registry.contains_client(ids[0]));
        assert!(registry.client_symbols(ids[0]).is_empty());
        assert!(registry.wanted().is_empty());
    }

    #[test]
    fn add_client_twice_is_rejected() {
        let (mut registry, ids) = registry_with(1);
        registry.subscribe(ids[0], &syms(&["AAPL"]));

        assert!(!registry.add_client(ids[0]));
        // Existing set survives
        assert_eq!(registry.client_symbols(ids[0]), set(&["AAPL"]));
    }

    #[test]
    fn subscribe_new_symbol() {
        let (mut registry, ids) = registry_with(1);

        let changes = registry.subscribe(ids[0], &syms(&["AAPL"]));

        assert_eq!(changes.subscribe, set(&["AAPL"]));
        assert!(changes.unsubscribe.is_empty());
    }

    #[test]
    fn subscribe_symbol_wanted_elsewhere() {
        let (mut registry, ids) = registry_with(2);
        registry.subscribe(ids[0], &syms(&["AAPL"]));

        let changes = registry.subscribe(ids[1], &syms(&["AAPL"]));

        assert!(changes.is_empty());
    }

    #[test]
    fn subscribe_duplicate_is_idempotent() {
        let (mut registry, ids) = registry_with(1);
        registry.subscribe(ids[0], &syms(&["AAPL"]));

        let changes = registry.subscribe(ids[0], &syms(&["AAPL", "AAPL"]));

        assert!(changes.is_empty());
        assert_eq!(registry.client_symbols(ids[0]), set(&["AAPL"]));
    }

    #[test]
    fn subscribe_partially_existing_symbols() {
        let (mut registry, ids) = registry_with(2);
        registry.subscribe(ids[0], &syms(&["AAPL"]));

        let changes = registry.subscribe(ids[1], &syms(&["AAPL", "MSFT"]));

        // Only MSFT needs upstream subscribe
        assert_eq!(changes.subscribe, set(&["MSFT"]));
    }

    #[test]
    fn subscribe_unknown_client_no_changes() {
        let mut registry = SubscriptionRegistry::new();

        let changes = registry.subscribe(ClientId::generate(), &syms(&["AAPL"]));

        assert!(changes.is_empty());
        assert!(registry.wanted().is_empty());
    }

    #[test]
    fn unsubscribe_with_remaining_clients() {
        let (mut registry, ids) = registry_with(2);
        registry.subscribe(ids[0], &syms(&["AAPL"]));
        registry.subscribe(ids[1], &syms(&["AAPL"]));

        let changes = registry.unsubscribe(ids[0], &syms(&["AAPL"]));

        assert!(changes.is_empty());
        assert!(registry.is_wanted("AAPL"));
    }

    #[test]
    fn unsubscribe_last_client() {
        let (mut registry, ids) = registry_with(1);
        registry.subscribe(ids[0], &syms(&["AAPL", "MSFT"]));

        let changes = registry.unsubscribe(ids[0], &syms(&["AAPL"]));

        assert_eq!(changes.unsubscribe, set(&["AAPL"]));
        assert_eq!(registry.wanted(), set(&["MSFT"]));
        // Client stays registered
        assert!(registry.contains_client(ids[0]));
    }

    #[test]
    fn unsubscribe_never_held_symbol_is_noop() {
        let (mut registry, ids) = registry_with(2);
        registry.subscribe(ids[0], &syms(&["AAPL"]));

        let changes = registry.unsubscribe(ids[1], &syms(&["AAPL", "GOOG"]));

        assert!(changes.is_empty());
        assert_eq!(registry.wanted(), set(&["AAPL"]));
    }

    #[test]
    fn remove_client_sweeps_orphans() {
        let (mut registry, ids) = registry_with(2);
        registry.subscribe(ids[0], &syms(&["AAPL", "MSFT"]));
        registry.subscribe(ids[1], &syms(&["MSFT", "TSLA"]));

        let changes = registry.remove_client(ids[0]);

        assert_eq!(changes.unsubscribe, set(&["AAPL"]));
        assert!(changes.subscribe.is_empty());
        assert!(!registry.contains_client(ids[0]));
        assert_eq!(registry.wanted(), set(&["MSFT", "TSLA"]));
    }

    #[test]
    fn remove_unknown_client_no_changes() {
        let (mut registry, ids) = registry_with(1);
        registry.subscribe(ids[0], &syms(&["AAPL"]));

        let changes = registry.remove_client(ClientId::generate());

        assert!(changes.is_empty());
        assert_eq!(registry.stats().symbol_count, 1);
    }

    #[test]
    fn subscribers_lists_interested_clients() {
        let (mut registry, ids) = registry_with(3);
        registry.subscribe(ids[0], &syms(&["AAPL"]));
        registry.subscribe(ids[1], &syms(&["AAPL", "MSFT"]));
        registry.subscribe(ids[2], &syms(&["MSFT"]));

        let mut aapl: Vec<_> = registry.subscribers("AAPL").collect();
        aapl.sort();
        let mut expected = vec![ids[0], ids[1]];
        expected.sort();

        assert_eq!(aapl, expected);
        assert_eq!(registry.subscribers("GOOG").count(), 0);
    }

    #[test]
    fn stats_are_accurate() {
        let (mut registry, ids) = registry_with(2);
        registry.subscribe(ids[0], &syms(&["AAPL", "MSFT"]));
        registry.subscribe(ids[1], &syms(&["AAPL"]));

        let stats = registry.stats();

        assert_eq!(stats.symbol_count, 2);
        assert_eq!(stats.client_count, 2);
    }

    #[test]
    fn subscription_changes_is_empty() {
        assert!(SubscriptionChanges::default().is_empty());
        assert!(!SubscriptionChanges::subscribe_only(syms(&["AAPL"])).is_empty());
        assert!(!SubscriptionChanges::unsubscribe_only(syms(&["AAPL"])).is_empty());
    }

    // =========================================================================
    // Union invariant
    // =========================================================================

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(usize, Vec<usize>),
        Unsubscribe(usize, Vec<usize>),
        Remove(usize),
        Add(usize),
    }

    const UNIVERSE: [&str; 6] = ["AAPL", "MSFT", "TSLA", "GOOG", "NVDA", "AMZN"];

    fn op_strategy() -> impl Strategy<Value = Op> {
        let client = 0..4usize;
        let symbols = prop::collection::vec(0..UNIVERSE.len(), 0..4);
        prop_oneof![
            (client.clone(), symbols.clone()).prop_map(|(c, s)| Op::Subscribe(c, s)),
            (client.clone(), symbols).prop_map(|(c, s)| Op::Unsubscribe(c, s)),
            client.clone().prop_map(Op::Remove),
            client.prop_map(Op::Add),
        ]
    }

    proptest! {
        #[test]
        fn upstream_view_tracks_union_of_clients(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let ids: Vec<_> = (0..4).map(|_| ClientId::generate()).collect();
            let mut registry = SubscriptionRegistry::new();
            // What an upstream receiving only the deltas would hold
            let mut upstream: BTreeSet<Symbol> = BTreeSet::new();

            for op in ops {
                let changes = match op {
                    Op::Add(c) => {
                        registry.add_client(ids[c]);
                        SubscriptionChanges::default()
                    }
                    Op::Subscribe(c, s) => {
                        let symbols: Vec<_> = s.iter().map(|i| UNIVERSE[*i].to_string()).collect();
                        let before = registry.wanted();
                        let changes = registry.subscribe(ids[c], &symbols);
                        // Minimal delta: nothing already wanted is re-sent
                        prop_assert!(changes.subscribe.is_disjoint(&before));
                        changes
                    }
                    Op::Unsubscribe(c, s) => {
                        let symbols: Vec<_> = s.iter().map(|i| UNIVERSE[*i].to_string()).collect();
                        registry.unsubscribe(ids[c], &symbols)
                    }
                    Op::Remove(c) => registry.remove_client(ids[c]),
                };

                for symbol in &changes.subscribe {
                    prop_assert!(upstream.insert(symbol.clone()), "duplicate upstream subscribe");
                }
                for symbol in &changes.unsubscribe {
                    prop_assert!(upstream.remove(symbol), "unsubscribe of unknown symbol");
                }

                let union: BTreeSet<Symbol> = registry
                    .clients()
                    .flat_map(|id| registry.client_symbols(id))
                    .collect();
                prop_assert_eq!(&registry.wanted(), &union);
                prop_assert_eq!(&upstream, &union);
            }
        }
    }
}
