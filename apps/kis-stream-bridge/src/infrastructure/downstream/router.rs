//! Downstream Session Router
//!
//! Owns every open browser session and its single active symbol.
//!
//! Each session carries an atomic "active listener id". Switching symbols
//! stores the new id before the old listener is removed from the registry,
//! so a callback of the abandoned listener that is still running finds a
//! stale id and queues nothing. The connection writer checks the same id
//! again before writing a queued PRICE.
//!
//! A PRICE that finds the session queue full goes into a one-item overflow
//! slot, replacing any older PRICE parked there. The writer takes the slot
//! once the queue is drained, so a slow session skips intermediate ticks but
//! always ends on the newest one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use super::messages::{ClientRequest, RequestError, ServerMessage, parse_client_request};
use crate::domain::market::{PriceTick, Symbol};
use crate::domain::subscription::{ListenerHandle, ListenerId, SubscriptionRegistry};
use crate::infrastructure::metrics;

/// Listener id meaning "no active symbol". Registry ids start at 1.
const NO_LISTENER: ListenerId = 0;

// =============================================================================
// Session Types
// =============================================================================

/// An item queued for a session's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// ACK or ERROR text, always written.
    Notice(String),
    /// PRICE text produced by `listener`; written only while it is still active.
    Price {
        /// Listener that produced the tick.
        listener: ListenerId,
        /// Serialized PRICE notification.
        payload: String,
    },
}

/// Newest PRICE that did not fit in the session queue.
#[derive(Debug, Default)]
struct Overflow {
    slot: Mutex<Option<(ListenerId, String)>>,
    ready: Notify,
}

/// Identifies an open session to the router and its writer.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    active_listener: Arc<AtomicU64>,
    overflow: Arc<Overflow>,
}

impl SessionHandle {
    /// Session id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a PRICE produced by `listener` may still be written.
    #[must_use]
    pub fn admits(&self, listener: ListenerId) -> bool {
        listener != NO_LISTENER && self.active_listener.load(Ordering::Acquire) == listener
    }

    /// Resolves once a PRICE has been parked in the overflow slot.
    pub async fn overflowed(&self) {
        self.overflow.ready.notified().await;
    }

    /// Take the parked PRICE, if it is still there.
    #[must_use]
    pub fn take_overflow(&self) -> Option<Outbound> {
        self.overflow
            .slot
            .lock()
            .take()
            .map(|(listener, payload)| Outbound::Price { listener, payload })
    }
}

struct Session {
    outbound: mpsc::Sender<Outbound>,
    active_listener: Arc<AtomicU64>,
    binding: Option<(Symbol, ListenerId)>,
}

// =============================================================================
// Router
// =============================================================================

/// Routes client requests to the subscription registry and ticks back to
/// the right sessions.
pub struct SessionRouter {
    registry: Arc<SubscriptionRegistry>,
    sessions: Mutex<HashMap<Uuid, Session>>,
    ack_on_connect: bool,
}

impl SessionRouter {
    /// Create a router over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, ack_on_connect: bool) -> Self {
        Self {
            registry,
            sessions: Mutex::new(HashMap::new()),
            ack_on_connect,
        }
    }

    /// Register a new session writing to `outbound`.
    pub async fn on_open(&self, outbound: mpsc::Sender<Outbound>) -> SessionHandle {
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            active_listener: Arc::new(AtomicU64::new(NO_LISTENER)),
            overflow: Arc::new(Overflow::default()),
        };

        let count = {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                handle.id,
                Session {
                    outbound: outbound.clone(),
                    active_listener: Arc::clone(&handle.active_listener),
                    binding: None,
                },
            );
            sessions.len()
        };
        metrics::set_downstream_sessions(count);
        tracing::info!(session = %handle.id, sessions = count, "Session opened");

        if self.ack_on_connect {
            let ack = ServerMessage::session_ack(handle.id.to_string());
            let _ = outbound.send(Outbound::Notice(ack.to_json())).await;
        }

        handle
    }

    /// Handle one text message from a session.
    ///
    /// Invalid requests are answered with an ERROR notification; the session
    /// stays open.
    pub async fn on_message(&self, session: &SessionHandle, payload: &str) {
        match parse_client_request(payload) {
            Ok(ClientRequest::Subscribe { code }) => self.subscribe(session, code).await,
            Err(e) => self.reject(session, &e).await,
        }
    }

    /// Answer a request the transport could not accept.
    pub async fn reject(&self, session: &SessionHandle, error: &RequestError) {
        tracing::debug!(session = %session.id, error = %error, "Rejected client request");
        self.notify(session, &ServerMessage::from(error)).await;
    }

    /// Drop a session and its listener.
    pub fn on_close(&self, session: &SessionHandle) {
        let (removed, count) = {
            let mut sessions = self.sessions.lock();
            let removed = sessions.remove(&session.id);
            (removed, sessions.len())
        };

        let Some(removed) = removed else {
            return;
        };

        removed.active_listener.store(NO_LISTENER, Ordering::Release);
        if let Some((symbol, listener)) = removed.binding {
            self.registry.remove_listener(&symbol, listener);
        }

        metrics::set_downstream_sessions(count);
        tracing::info!(session = %session.id, sessions = count, "Session closed");
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Active symbol of a session, if any.
    #[must_use]
    pub fn session_symbol(&self, session: Uuid) -> Option<Symbol> {
        self.sessions
            .lock()
            .get(&session)
            .and_then(|s| s.binding.as_ref().map(|(symbol, _)| symbol.clone()))
    }

    async fn subscribe(&self, session: &SessionHandle, code: Symbol) {
        let (outbound, previous) = {
            let sessions = self.sessions.lock();
            let Some(current) = sessions.get(&session.id) else {
                return;
            };
            (current.outbound.clone(), current.binding.clone())
        };

        if previous.as_ref().is_some_and(|(symbol, _)| *symbol == code) {
            self.notify(session, &ServerMessage::subscribe_ack(code)).await;
            return;
        }

        let listener = self.registry.allocate_listener_id();
        session.active_listener.store(listener, Ordering::Release);

        if let Some((old_symbol, old_listener)) = &previous {
            self.registry.remove_listener(old_symbol, *old_listener);
        }

        let handle = price_listener(
            listener,
            Arc::clone(&session.active_listener),
            Arc::clone(&session.overflow),
            outbound,
        );
        self.registry.add_listener(&code, handle);

        {
            let mut sessions = self.sessions.lock();
            if let Some(current) = sessions.get_mut(&session.id) {
                current.binding = Some((code.clone(), listener));
            }
        }

        tracing::info!(
            session = %session.id,
            symbol = %code,
            previous = previous.as_ref().map(|(s, _)| s.as_str()),
            "Session subscribed"
        );
        self.notify(session, &ServerMessage::subscribe_ack(code)).await;
    }

    async fn notify(&self, session: &SessionHandle, message: &ServerMessage) {
        let outbound = self
            .sessions
            .lock()
            .get(&session.id)
            .map(|s| s.outbound.clone());

        if let Some(outbound) = outbound {
            let _ = outbound.send(Outbound::Notice(message.to_json())).await;
        }
    }
}

impl std::fmt::Debug for SessionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRouter")
            .field("sessions", &self.session_count())
            .field("ack_on_connect", &self.ack_on_connect)
            .finish_non_exhaustive()
    }
}

fn price_listener(
    listener: ListenerId,
    active_listener: Arc<AtomicU64>,
    overflow: Arc<Overflow>,
    outbound: mpsc::Sender<Outbound>,
) -> ListenerHandle {
    ListenerHandle::new(listener, move |tick: &PriceTick| {
        if active_listener.load(Ordering::Acquire) != listener {
            return;
        }

        let payload = ServerMessage::Price {
            code: tick.symbol.clone(),
            price: tick.price.clone(),
        }
        .to_json();

        // Held across the send so the writer never sees a parked PRICE that
        // is older than one already queued.
        let mut slot = overflow.slot.lock();
        match outbound.try_send(Outbound::Price { listener, payload }) {
            Ok(()) => {
                metrics::record_price_delivered();
                if slot.take().is_some() {
                    metrics::record_price_dropped();
                }
            }
            Err(TrySendError::Full(Outbound::Price { listener, payload })) => {
                metrics::record_price_delivered();
                if slot.replace((listener, payload)).is_some() {
                    metrics::record_price_dropped();
                    tracing::debug!(listener, symbol = %tick.symbol, "Session queue full, older tick replaced");
                }
                overflow.ready.notify_one();
            }
            Err(_) => {}
        }
    })
}

// =============================================================================
// Tests
// =============================================================================
