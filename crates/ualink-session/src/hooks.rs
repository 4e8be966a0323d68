//! Callbacks out of the state machine: session activity listeners and the
//! subscription manager.

use std::sync::Arc;

use parking_lot::Mutex;
use ualink_protocol::StatusCode;

use crate::Session;

/// Told when a session becomes usable and when it stops being usable.
///
/// Calls happen on the state machine task, after the transition that
/// caused them has completed, one transition at a time. Both methods
/// default to doing nothing.
///
/// The session is lent for the duration of the call; clone what you need
/// rather than holding on to it.
pub trait SessionActivityListener: Send + Sync + 'static {
    /// The state machine moved from a non-active state into `Active`.
    fn on_session_active(&self, _session: &Session) {}

    /// The state machine left `Active`.
    fn on_session_inactive(&self, _session: &Session) {}
}

/// Lifecycle hooks into whatever owns the client's subscriptions.
pub trait SubscriptionManager: Send + Sync + 'static {
    /// (Re)start publishing on the now active session. `reset_counters` is
    /// `true` after a fresh activation and `false` after a reactivation.
    fn start_publishing(&self, reset_counters: bool);

    /// Ids of subscriptions created on an earlier session, which should
    /// be transferred when a new session is activated.
    fn subscription_ids(&self) -> Vec<u32> {
        Vec::new()
    }

    /// Per-subscription outcome of a transfer. Subscriptions with a bad
    /// status did not survive and should be dropped.
    fn transfer_completed(&self, _results: &[(u32, StatusCode)]) {}
}

/// Identifies a registered [`SessionActivityListener`] for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn SessionActivityListener>)>,
}

/// Shared listener list. Notification iterates over a snapshot taken under
/// the lock, so listeners may add or remove listeners from their callback.
#[derive(Clone, Default)]
pub(crate) struct ListenerRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: Arc<dyn SessionActivityListener>) -> ListenerId {
        let mut registry = self.inner.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut registry = self.inner.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(existing, _)| *existing != id);
        registry.listeners.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn SessionActivityListener>> {
        self.inner
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }

    pub(crate) fn notify_active(&self, session: &Session) {
        for listener in self.snapshot() {
            listener.on_session_active(session);
        }
    }

    pub(crate) fn notify_inactive(&self, session: &Session) {
        for listener in self.snapshot() {
            listener.on_session_inactive(session);
        }
    }
}
