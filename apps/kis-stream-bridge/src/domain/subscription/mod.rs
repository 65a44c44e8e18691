//! Subscription Registry
//!
//! Tracks which downstream listeners want prices for which symbol and
//! decides when the upstream feed must actually be told about it.
//!
//! # Design
//!
//! The registry keeps, per symbol, the set of listener handles currently
//! interested in it:
//! - the first handle for a symbol (0→1) asks the upstream to connect and
//!   subscribe
//! - removing the last handle (1→0) asks the upstream to unsubscribe and
//!   drops the entry
//!
//! Both transitions happen under one lock, and the upstream commands are
//! issued while it is held, so the upstream observes transitions in exactly
//! the order they happened. A symbol is present in the map iff its listener
//! set is non-empty.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::application::ports::UpstreamControl;
use crate::domain::market::{PriceTick, Symbol};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier of a listener handle.
pub type ListenerId = u64;

type PriceCallback = dyn Fn(&PriceTick) + Send + Sync;

/// One downstream session's registered interest in one symbol.
///
/// Handles are compared by id; the callback is invoked for every tick of the
/// symbol the handle is registered under.
#[derive(Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    callback: Arc<PriceCallback>,
}

impl ListenerHandle {
    /// Create a handle with the given id and tick callback.
    pub fn new<F>(id: ListenerId, callback: F) -> Self
    where
        F: Fn(&PriceTick) + Send + Sync + 'static,
    {
        Self {
            id,
            callback: Arc::new(callback),
        }
    }

    /// The handle's id.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Deliver a tick to the handle's callback.
    pub fn notify(&self, tick: &PriceTick) {
        (self.callback)(tick);
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Effect of an `add_listener`/`remove_listener` call on a symbol's count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 0→1: the upstream was asked to subscribe.
    FirstListener,
    /// n→n+1 with n ≥ 1: no upstream traffic.
    Joined,
    /// n→n-1 with n ≥ 2: no upstream traffic.
    Left,
    /// 1→0: the upstream was asked to unsubscribe.
    LastListener,
    /// The handle was already registered, or was not registered at all.
    Unchanged,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe map from symbol to the listeners registered for it.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use kis_stream_bridge::application::ports::UpstreamControl;
/// use kis_stream_bridge::domain::subscription::{
///     ListenerHandle, SubscriptionRegistry, Transition,
/// };
///
/// struct Quiet;
/// impl UpstreamControl for Quiet {
///     fn ensure_connected(&self) {}
///     fn subscribe(&self, _symbol: &str) {}
///     fn unsubscribe(&self, _symbol: &str) {}
/// }
///
/// let registry = SubscriptionRegistry::new(Arc::new(Quiet));
/// let first = ListenerHandle::new(registry.allocate_listener_id(), |_| {});
/// let second = ListenerHandle::new(registry.allocate_listener_id(), |_| {});
/// let (first_id, second_id) = (first.id(), second.id());
///
/// assert_eq!(registry.add_listener("005930", first), Transition::FirstListener);
/// assert_eq!(registry.add_listener("005930", second), Transition::Joined);
/// assert_eq!(registry.remove_listener("005930", first_id), Transition::Left);
/// assert_eq!(registry.remove_listener("005930", second_id), Transition::LastListener);
/// ```
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<Symbol, HashMap<ListenerId, ListenerHandle>>>,
    upstream: Arc<dyn UpstreamControl>,
    next_listener_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry that reports transitions to `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamControl>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            upstream,
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Allocate a listener id that no other handle of this registry uses.
    pub fn allocate_listener_id(&self) -> ListenerId {
        self.next_listener_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `handle` for `symbol`.
    ///
    /// On the 0→1 transition the upstream is asked to connect and then to
    /// subscribe, in that order.
    pub fn add_listener(&self, symbol: &str, handle: ListenerHandle) -> Transition {
        let mut entries = self.entries.lock();
        let listeners = entries.entry(symbol.to_owned()).or_default();

        if listeners.contains_key(&handle.id()) {
            return Transition::Unchanged;
        }
        listeners.insert(handle.id(), handle);

        if listeners.len() == 1 {
            self.upstream.ensure_connected();
            self.upstream.subscribe(symbol);
            Transition::FirstListener
        } else {
            Transition::Joined
        }
    }

    /// Remove the handle with id `listener` from `symbol`.
    ///
    /// On the 1→0 transition the entry is discarded and the upstream is asked
    /// to unsubscribe.
    pub fn remove_listener(&self, symbol: &str, listener: ListenerId) -> Transition {
        let mut entries = self.entries.lock();
        let Some(listeners) = entries.get_mut(symbol) else {
            return Transition::Unchanged;
        };

        if listeners.remove(&listener).is_none() {
            return Transition::Unchanged;
        }

        if listeners.is_empty() {
            entries.remove(symbol);
            self.upstream.unsubscribe(symbol);
            Transition::LastListener
        } else {
            Transition::Left
        }
    }

    /// Deliver a tick to every listener of its symbol.
    ///
    /// Callbacks run outside the registry lock. Returns the number of
    /// listeners notified; zero for symbols nobody wants.
    pub fn dispatch(&self, tick: &PriceTick) -> usize {
        let listeners: Vec<ListenerHandle> = self
            .entries
            .lock()
            .get(&tick.symbol)
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener.notify(tick);
        }

        listeners.len()
    }

    /// Whether anyone currently listens to `symbol`.
    #[must_use]
    pub fn has_listeners(&self, symbol: &str) -> bool {
        self.entries.lock().contains_key(symbol)
    }

    /// Number of listeners registered for `symbol`.
    #[must_use]
    pub fn listener_count(&self, symbol: &str) -> usize {
        self.entries.lock().get(symbol).map_or(0, HashMap::len)
    }

    /// All symbols with a non-empty listener set, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.entries.lock().keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.lock();
        RegistryStats {
            symbol_count: entries.len(),
            listener_count: entries.values().map(HashMap::len).sum(),
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Symbols with at least one listener.
    pub symbol_count: usize,
    /// Listener handles across all symbols.
    pub listener_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
