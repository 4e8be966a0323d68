//! Error types for subscription bookkeeping.

/// Errors from [`SubscriptionRegistry`](crate::SubscriptionRegistry)
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// No subscription with this id is registered.
    #[error("subscription {0} not found")]
    NotFound(u32),

    /// A subscription with this id is already registered.
    #[error("subscription {0} already registered")]
    AlreadyExists(u32),

    /// A notification arrived with a sequence number at or below the last
    /// one seen for the subscription.
    #[error("subscription {subscription_id}: sequence number {received} is not after {last}")]
    StaleSequence {
        subscription_id: u32,
        last: u32,
        received: u32,
    },
}
