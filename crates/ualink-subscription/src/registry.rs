//! The subscription registry: which subscriptions exist, where their
//! notification streams are up to, and what happens to them when the
//! session changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use ualink_protocol::StatusCode;
use ualink_session::SubscriptionManager;

use crate::{Subscription, SubscriptionError, SubscriptionListener};

#[derive(Debug)]
struct Entry {
    subscription: Subscription,
    /// Last notification sequence number seen. 0 before the first one.
    last_sequence_number: u32,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<u32, Entry>,
    publishing: bool,
    /// Notifications recorded since counters were last reset.
    notifications: u64,
    /// How many times publishing has been (re)started.
    publish_starts: u64,
}

/// Publish bookkeeping for the subscriptions of one client.
///
/// Implements [`SubscriptionManager`], so the session state machine can
/// restart publishing and hand over transfer results after a new session
/// is activated. Subscriptions that fail to transfer are dropped and
/// reported to every [`SubscriptionListener`].
///
/// All methods take `&self`; state sits behind a `parking_lot::Mutex`.
/// Listeners are called after the lock is released.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Arc<dyn SubscriptionListener>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription created on the current session.
    pub fn add(&self, subscription: Subscription) -> Result<(), SubscriptionError> {
        let mut inner = self.inner.lock();
        let id = subscription.subscription_id;
        if inner.entries.contains_key(&id) {
            return Err(SubscriptionError::AlreadyExists(id));
        }
        inner.entries.insert(
            id,
            Entry {
                subscription,
                last_sequence_number: 0,
            },
        );
        debug!(subscription_id = id, count = inner.entries.len(), "subscription added");
        Ok(())
    }

    /// Forgets a subscription and returns it.
    pub fn remove(&self, subscription_id: u32) -> Result<Subscription, SubscriptionError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .remove(&subscription_id)
            .ok_or(SubscriptionError::NotFound(subscription_id))?;
        debug!(subscription_id, count = inner.entries.len(), "subscription removed");
        Ok(entry.subscription)
    }

    pub fn get(&self, subscription_id: u32) -> Option<Subscription> {
        self.inner
            .lock()
            .entries
            .get(&subscription_id)
            .map(|e| e.subscription.clone())
    }

    /// Every registered subscription, ordered by id.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner
            .lock()
            .entries
            .values()
            .map(|e| e.subscription.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once publishing has been started on some session.
    pub fn is_publishing(&self) -> bool {
        self.inner.lock().publishing
    }

    /// Records a notification. Sequence numbers must increase per
    /// subscription; a repeat or an older one is rejected.
    pub fn record_notification(
        &self,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<(), SubscriptionError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&subscription_id)
            .ok_or(SubscriptionError::NotFound(subscription_id))?;
        if sequence_number <= entry.last_sequence_number {
            return Err(SubscriptionError::StaleSequence {
                subscription_id,
                last: entry.last_sequence_number,
                received: sequence_number,
            });
        }
        entry.last_sequence_number = sequence_number;
        inner.notifications += 1;
        Ok(())
    }

    /// Last sequence number seen for a subscription.
    pub fn last_sequence_number(&self, subscription_id: u32) -> Option<u32> {
        self.inner
            .lock()
            .entries
            .get(&subscription_id)
            .map(|e| e.last_sequence_number)
    }

    /// Notifications recorded since the counters were last reset.
    pub fn notification_count(&self) -> u64 {
        self.inner.lock().notifications
    }

    /// How many times publishing has been (re)started.
    pub fn publish_starts(&self) -> u64 {
        self.inner.lock().publish_starts
    }

    pub fn add_listener(&self, listener: Arc<dyn SubscriptionListener>) {
        self.listeners.lock().push(listener);
    }

    /// Removes a listener previously added. Returns `false` if it was not
    /// registered.
    pub fn remove_listener(&self, listener: &Arc<dyn SubscriptionListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }
}

impl SubscriptionManager for SubscriptionRegistry {
    fn start_publishing(&self, reset_counters: bool) {
        let mut inner = self.inner.lock();
        inner.publishing = true;
        inner.publish_starts += 1;
        if reset_counters {
            inner.notifications = 0;
            for entry in inner.entries.values_mut() {
                entry.last_sequence_number = 0;
            }
        }
        debug!(
            reset_counters,
            subscriptions = inner.entries.len(),
            "publishing started"
        );
    }

    fn subscription_ids(&self) -> Vec<u32> {
        self.inner.lock().entries.keys().copied().collect()
    }

    fn transfer_completed(&self, results: &[(u32, StatusCode)]) {
        let failed: Vec<(Subscription, StatusCode)> = {
            let mut inner = self.inner.lock();
            results
                .iter()
                .filter(|(_, status)| !status.is_good())
                .filter_map(|(id, status)| {
                    inner
                        .entries
                        .remove(id)
                        .map(|entry| (entry.subscription, *status))
                })
                .collect()
        };

        if failed.is_empty() {
            return;
        }
        let listeners = self.listeners.lock().clone();
        for (subscription, status) in &failed {
            warn!(subscription_id = subscription.subscription_id, %status, "subscription transfer failed");
            for listener in &listeners {
                listener.on_subscription_transfer_failed(subscription, *status);
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &inner.entries.len())
            .field("publishing", &inner.publishing)
            .finish()
    }
}
