//! Subscription bookkeeping for ualink.
//!
//! [`SubscriptionRegistry`] tracks the subscriptions a client has created
//! and plugs into the session state machine as its
//! [`SubscriptionManager`](ualink_session::SubscriptionManager):
//!
//! - on every activation it is told to (re)start publishing, resetting its
//!   publish counters only after a fresh activation;
//! - after a new session is created it supplies the ids to transfer and
//!   receives the per-subscription results, dropping the failures and
//!   reporting them through [`SubscriptionListener`].
//!
//! Sending publish requests is not done here.

mod error;
mod registry;
mod subscription;

pub use error::SubscriptionError;
pub use registry::SubscriptionRegistry;
pub use subscription::{Subscription, SubscriptionListener};
