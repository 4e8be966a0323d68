//! Transfer results as the session state machine delivers them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ualink_protocol::StatusCode;
use ualink_session::SubscriptionManager;
use ualink_subscription::{Subscription, SubscriptionListener, SubscriptionRegistry};

#[derive(Default)]
struct FailedTransfers(Mutex<Vec<(u32, StatusCode)>>);

impl SubscriptionListener for FailedTransfers {
    fn on_subscription_transfer_failed(&self, subscription: &Subscription, status: StatusCode) {
        self.0.lock().push((subscription.subscription_id, status));
    }
}

fn registry_with(ids: &[u32]) -> SubscriptionRegistry {
    let registry = SubscriptionRegistry::new();
    for id in ids {
        registry
            .add(Subscription::new(*id, Duration::from_millis(250)))
            .unwrap();
    }
    registry
}

#[test]
fn test_transfer_completed_drops_failures_and_notifies() {
    let registry = registry_with(&[1, 2, 3]);
    let listener = Arc::new(FailedTransfers::default());
    registry.add_listener(listener.clone());

    registry.transfer_completed(&[
        (1, StatusCode::GOOD),
        (2, StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
        (3, StatusCode::BAD_SESSION_CLOSED),
    ]);

    assert_eq!(registry.subscription_ids(), [1]);
    assert_eq!(
        *listener.0.lock(),
        [
            (2, StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
            (3, StatusCode::BAD_SESSION_CLOSED)
        ]
    );
}

#[test]
fn test_transfer_completed_all_good_keeps_everything_quiet() {
    let registry = registry_with(&[1, 2]);
    let listener = Arc::new(FailedTransfers::default());
    registry.add_listener(listener.clone());

    registry.transfer_completed(&[(1, StatusCode::GOOD), (2, StatusCode::GOOD)]);

    assert_eq!(registry.len(), 2);
    assert!(listener.0.lock().is_empty());
}

#[test]
fn test_transfer_completed_ignores_unknown_ids() {
    let registry = registry_with(&[1]);
    let listener = Arc::new(FailedTransfers::default());
    registry.add_listener(listener.clone());

    registry.transfer_completed(&[(8, StatusCode::BAD_SUBSCRIPTION_ID_INVALID)]);

    assert_eq!(registry.len(), 1);
    assert!(listener.0.lock().is_empty());
}

#[test]
fn test_removed_listener_not_told_about_failures() {
    let registry = registry_with(&[1]);
    let listener: Arc<dyn SubscriptionListener> = Arc::new(FailedTransfers::default());
    registry.add_listener(listener.clone());

    assert!(registry.remove_listener(&listener));
    assert!(!registry.remove_listener(&listener));
    registry.transfer_completed(&[(1, StatusCode::BAD_SUBSCRIPTION_ID_INVALID)]);

    assert!(registry.is_empty());
}

#[test]
fn test_reactivation_keeps_sequence_numbers() {
    let registry = registry_with(&[4]);
    registry.start_publishing(true);
    registry.record_notification(4, 1).unwrap();
    registry.record_notification(4, 2).unwrap();

    // Reactivation: same session, the stream continues.
    registry.start_publishing(false);
    assert_eq!(registry.last_sequence_number(4), Some(2));
    assert!(registry.record_notification(4, 3).is_ok());
}
