//! Subscription parameters and listener callbacks.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ualink_protocol::StatusCode;

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A subscription as the server revised it when it was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Server-assigned id. Survives a transfer to a new session.
    pub subscription_id: u32,

    /// How often the server publishes.
    pub publishing_interval: Duration,

    /// Publishing intervals without a publish request before the server
    /// deletes the subscription.
    pub lifetime_count: u32,

    /// Publishing intervals without notifications before the server sends
    /// a keep-alive.
    pub max_keep_alive_count: u32,

    pub publishing_enabled: bool,
}

impl Subscription {
    /// A subscription with the given id and interval, publishing enabled,
    /// and the usual 3:1 lifetime to keep-alive ratio.
    pub fn new(subscription_id: u32, publishing_interval: Duration) -> Self {
        Self {
            subscription_id,
            publishing_interval,
            lifetime_count: 30,
            max_keep_alive_count: 10,
            publishing_enabled: true,
        }
    }

    pub fn with_counts(mut self, lifetime_count: u32, max_keep_alive_count: u32) -> Self {
        self.lifetime_count = lifetime_count;
        self.max_keep_alive_count = max_keep_alive_count;
        self
    }

    /// How long the server keeps the subscription alive without publish
    /// requests.
    pub fn lifetime(&self) -> Duration {
        self.publishing_interval * self.lifetime_count
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.subscription_id)
    }
}

// ---------------------------------------------------------------------------
// SubscriptionListener
// ---------------------------------------------------------------------------

/// Told about subscription lifecycle changes the registry makes on its own.
pub trait SubscriptionListener: Send + Sync + 'static {
    /// A new session was established and `subscription` could not be
    /// transferred to it. It has been removed from the registry and must
    /// be created again.
    fn on_subscription_transfer_failed(&self, subscription: &Subscription, status: StatusCode);
}
