//! The seven session states and the transition table between them.
//!
//! A [`SessionState`] holds exactly what its phase needs: callers waiting
//! for a session, the session being built or kept alive, a pending timer.
//! `transition` is pure bookkeeping: it decides the next state and moves
//! the waiting callers over to it. All I/O happens when the actor
//! activates the new state (see `activate.rs`).

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use ualink_timer::TimerHandle;

use crate::event::next_delay;
use crate::{Session, SessionError, SessionEvent, SessionStateKind};

/// Where the result of one `get_session` call is delivered.
pub(crate) type SessionReply = oneshot::Sender<Result<Arc<Session>, SessionError>>;

// ---------------------------------------------------------------------------
// Waiters
// ---------------------------------------------------------------------------

/// Callers waiting for the session this lineage of states is working
/// towards.
///
/// Waiters travel with the lineage (`CreatingSession → ActivatingSession →
/// Active`, or `ReactivateDelay → ReactivateExecute → Active`). Any still
/// waiting when their state is dropped fail with
/// [`SessionError::SessionClosed`].
#[derive(Default)]
pub(crate) struct Waiters(Vec<SessionReply>);

impl Waiters {
    pub(crate) fn push(&mut self, reply: SessionReply) {
        self.0.push(reply);
    }

    pub(crate) fn take(&mut self) -> Self {
        Self(std::mem::take(&mut self.0))
    }

    pub(crate) fn resolve(&mut self, session: &Arc<Session>) {
        for reply in self.0.drain(..) {
            let _ = reply.send(Ok(session.clone()));
        }
    }

    pub(crate) fn fail(&mut self, error: &SessionError) {
        for reply in self.0.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

impl Drop for Waiters {
    fn drop(&mut self) {
        self.fail(&SessionError::SessionClosed);
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

pub(crate) enum SessionState {
    Inactive {
        /// A session the server created for an attempt that was then
        /// abandoned. Closed when this state is entered.
        abandoned: Option<Arc<Session>>,
    },

    CreatingSession {
        waiters: Waiters,
        /// Set once the create response has arrived.
        created: Option<Arc<Session>>,
    },

    ActivatingSession {
        waiters: Waiters,
        session: Arc<Session>,
    },

    Active {
        waiters: Waiters,
        session: Arc<Session>,
        /// Watches the channel for loss and session faults.
        watcher: Option<JoinHandle<()>>,
    },

    ClosingSession {
        session: Arc<Session>,
        /// Notified when this state is left.
        completions: Vec<oneshot::Sender<()>>,
    },

    ReactivateDelay {
        previous: Arc<Session>,
        delay_secs: u64,
        waiters: Waiters,
        timer: Option<TimerHandle>,
    },

    ReactivateExecute {
        previous: Arc<Session>,
        delay_secs: u64,
        waiters: Waiters,
        /// Set once the activate response has arrived.
        session: Option<Arc<Session>>,
    },
}

impl SessionState {
    pub(crate) fn inactive() -> Self {
        Self::Inactive { abandoned: None }
    }

    pub(crate) fn creating() -> Self {
        Self::CreatingSession {
            waiters: Waiters::default(),
            created: None,
        }
    }

    pub(crate) fn closing(session: Arc<Session>) -> Self {
        Self::ClosingSession {
            session,
            completions: Vec::new(),
        }
    }

    pub(crate) fn reactivate_delay(previous: Arc<Session>, delay_secs: u64) -> Self {
        Self::ReactivateDelay {
            previous,
            delay_secs,
            waiters: Waiters::default(),
            timer: None,
        }
    }

    /// The tag for this state.
    pub(crate) fn kind(&self) -> SessionStateKind {
        match self {
            Self::Inactive { .. } => SessionStateKind::Inactive,
            Self::CreatingSession { .. } => SessionStateKind::CreatingSession,
            Self::ActivatingSession { .. } => SessionStateKind::ActivatingSession,
            Self::Active { .. } => SessionStateKind::Active,
            Self::ClosingSession { .. } => SessionStateKind::ClosingSession,
            Self::ReactivateDelay { .. } => SessionStateKind::ReactivateDelay,
            Self::ReactivateExecute { .. } => SessionStateKind::ReactivateExecute,
        }
    }

    /// The session, if this is `Active`.
    pub(crate) fn active_session(&self) -> Option<&Arc<Session>> {
        match self {
            Self::Active { session, .. } => Some(session),
            _ => None,
        }
    }

    /// Hands a `get_session` caller to this state's lineage.
    pub(crate) fn attach(&mut self, reply: SessionReply) {
        match self {
            Self::Active { session, .. } => {
                let _ = reply.send(Ok(session.clone()));
            }
            Self::Inactive { .. } | Self::ClosingSession { .. } => {
                let _ = reply.send(Err(SessionError::SessionClosed));
            }
            Self::CreatingSession { waiters, .. }
            | Self::ActivatingSession { waiters, .. }
            | Self::ReactivateDelay { waiters, .. }
            | Self::ReactivateExecute { waiters, .. } => waiters.push(reply),
        }
    }

    /// The state `event` leads to, or `None` if this state ignores it.
    ///
    /// Waiting callers move to the next state when it continues the same
    /// lineage; otherwise they stay behind and fail when `self` is dropped.
    pub(crate) fn transition(&mut self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;

        let next = match (self, event) {
            (Self::Inactive { .. }, E::SessionRequested) => Self::creating(),

            (Self::CreatingSession { waiters, created }, E::CreateSucceeded) => {
                let session = created.take()?;
                Self::ActivatingSession {
                    waiters: waiters.take(),
                    session,
                }
            }
            (Self::CreatingSession { created, .. }, E::DisconnectRequested) => Self::Inactive {
                abandoned: created.take(),
            },
            (Self::CreatingSession { .. }, E::ErrCreateFailed) => Self::inactive(),

            (Self::ActivatingSession { waiters, session }, E::ActivateSucceeded) => Self::Active {
                waiters: waiters.take(),
                session: session.clone(),
                watcher: None,
            },
            (Self::ActivatingSession { .. }, E::ErrActivateFailed) => Self::inactive(),
            (Self::ActivatingSession { session, .. }, E::DisconnectRequested) => {
                Self::closing(session.clone())
            }

            (Self::Active { session, .. }, E::DisconnectRequested) => Self::closing(session.clone()),
            (Self::Active { session, .. }, E::ErrConnectionLost) => {
                Self::reactivate_delay(session.clone(), 0)
            }
            (Self::Active { .. }, E::ErrSessionInvalid) => Self::creating(),

            (Self::ClosingSession { .. }, E::DisconnectSucceeded) => Self::inactive(),
            (Self::ClosingSession { .. }, E::SessionRequested) => Self::creating(),

            (Self::ReactivateDelay { previous, .. }, E::DisconnectRequested) => {
                Self::closing(previous.clone())
            }
            (
                Self::ReactivateDelay {
                    previous,
                    delay_secs,
                    waiters,
                    ..
                },
                E::ReactivateRequested,
            ) => Self::ReactivateExecute {
                previous: previous.clone(),
                delay_secs: *delay_secs,
                waiters: waiters.take(),
                session: None,
            },

            (
                Self::ReactivateExecute {
                    previous,
                    waiters,
                    session,
                    ..
                },
                E::ReactivateSucceeded,
            ) => Self::Active {
                waiters: waiters.take(),
                session: session.take().unwrap_or_else(|| previous.clone()),
                watcher: None,
            },
            (
                Self::ReactivateExecute {
                    previous,
                    delay_secs,
                    ..
                },
                E::ErrReactivateFailed,
            ) => Self::reactivate_delay(previous.clone(), next_delay(*delay_secs)),
            (Self::ReactivateExecute { .. }, E::ErrReactivateInvalid) => Self::creating(),
            (
                Self::ReactivateExecute {
                    previous, session, ..
                },
                E::DisconnectRequested,
            ) => Self::closing(session.clone().unwrap_or_else(|| previous.clone())),

            _ => return None,
        };
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ualink_protocol::{ByteString, NodeId};

    use super::*;

    fn session() -> Arc<Session> {
        Arc::new(Session {
            authentication_token: NodeId::numeric(0, 1),
            session_id: NodeId::numeric(1, 1),
            session_name: "test".into(),
            session_timeout: Duration::from_secs(60),
            max_request_size: 0,
            server_certificate: ByteString::NULL,
            server_software_certificates: Vec::new(),
            server_nonce: ByteString::NULL,
        })
    }

    fn active() -> SessionState {
        SessionState::Active {
            waiters: Waiters::default(),
            session: session(),
            watcher: None,
        }
    }

    fn all_events() -> [SessionEvent; 13] {
        use SessionEvent::*;
        [
            SessionRequested,
            DisconnectRequested,
            CreateSucceeded,
            ErrCreateFailed,
            ActivateSucceeded,
            ErrActivateFailed,
            ErrConnectionLost,
            ErrSessionInvalid,
            ReactivateRequested,
            ReactivateSucceeded,
            ErrReactivateFailed,
            ErrReactivateInvalid,
            DisconnectSucceeded,
        ]
    }

    fn next_kind(mut state: SessionState, event: SessionEvent) -> Option<SessionStateKind> {
        state.transition(event).map(|s| s.kind())
    }

    #[test]
    fn test_transition_inactive_only_handles_session_requested() {
        for event in all_events() {
            let next = next_kind(SessionState::inactive(), event);
            if event == SessionEvent::SessionRequested {
                assert_eq!(next, Some(SessionStateKind::CreatingSession));
            } else {
                assert_eq!(next, None, "Inactive should ignore {event}");
            }
        }
    }

    #[test]
    fn test_transition_active_table() {
        use SessionEvent::*;
        assert_eq!(
            next_kind(active(), DisconnectRequested),
            Some(SessionStateKind::ClosingSession)
        );
        assert_eq!(
            next_kind(active(), ErrConnectionLost),
            Some(SessionStateKind::ReactivateDelay)
        );
        assert_eq!(
            next_kind(active(), ErrSessionInvalid),
            Some(SessionStateKind::CreatingSession)
        );
        assert_eq!(next_kind(active(), SessionRequested), None);
        assert_eq!(next_kind(active(), ActivateSucceeded), None);
    }

    #[test]
    fn test_transition_disconnect_after_create_response_keeps_session_to_close() {
        let mut creating = SessionState::CreatingSession {
            waiters: Waiters::default(),
            created: Some(session()),
        };
        match creating.transition(SessionEvent::DisconnectRequested) {
            Some(SessionState::Inactive { abandoned }) => {
                let abandoned = abandoned.map(|s| s.session_id.clone());
                assert_eq!(abandoned, Some(NodeId::numeric(1, 1)));
            }
            _ => panic!("expected Inactive"),
        }
        match SessionState::creating().transition(SessionEvent::DisconnectRequested) {
            Some(SessionState::Inactive { abandoned }) => assert!(abandoned.is_none()),
            _ => panic!("expected Inactive"),
        }
    }

    #[test]
    fn test_transition_create_succeeded_without_response_is_ignored() {
        assert_eq!(
            next_kind(SessionState::creating(), SessionEvent::CreateSucceeded),
            None
        );
    }

    #[test]
    fn test_transition_connection_lost_starts_at_zero_delay() {
        let mut state = active();
        match state.transition(SessionEvent::ErrConnectionLost) {
            Some(SessionState::ReactivateDelay { delay_secs, .. }) => assert_eq!(delay_secs, 0),
            _ => panic!("expected ReactivateDelay"),
        }
    }

    #[test]
    fn test_transition_reactivate_failed_advances_backoff() {
        let mut state = SessionState::ReactivateExecute {
            previous: session(),
            delay_secs: 4,
            waiters: Waiters::default(),
            session: None,
        };
        match state.transition(SessionEvent::ErrReactivateFailed) {
            Some(SessionState::ReactivateDelay { delay_secs, .. }) => assert_eq!(delay_secs, 8),
            _ => panic!("expected ReactivateDelay"),
        }
    }

    #[test]
    fn test_transition_closing_handles_restart_and_completion() {
        use SessionEvent::*;
        let closing = || SessionState::closing(session());
        assert_eq!(
            next_kind(closing(), DisconnectSucceeded),
            Some(SessionStateKind::Inactive)
        );
        assert_eq!(
            next_kind(closing(), SessionRequested),
            Some(SessionStateKind::CreatingSession)
        );
        assert_eq!(next_kind(closing(), DisconnectRequested), None);
    }

    #[tokio::test]
    async fn test_waiters_follow_the_lineage() {
        let mut delay = SessionState::reactivate_delay(session(), 0);
        let (tx, rx) = oneshot::channel();
        delay.attach(tx);

        let mut execute = delay.transition(SessionEvent::ReactivateRequested).unwrap();
        drop(delay);
        let Some(mut active) = execute.transition(SessionEvent::ReactivateSucceeded) else {
            panic!("expected Active");
        };
        drop(execute);

        if let SessionState::Active {
            waiters, session, ..
        } = &mut active
        {
            waiters.resolve(session);
        }
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_waiters_of_abandoned_lineage_fail_closed() {
        let mut creating = SessionState::creating();
        let (tx, rx) = oneshot::channel();
        creating.attach(tx);

        let next = creating.transition(SessionEvent::DisconnectRequested).unwrap();
        assert_eq!(next.kind(), SessionStateKind::Inactive);
        drop(creating);

        assert_eq!(rx.await.unwrap(), Err(SessionError::SessionClosed));
    }

    #[tokio::test]
    async fn test_attach_to_closing_fails_immediately() {
        let mut closing = SessionState::closing(session());
        let (tx, rx) = oneshot::channel();
        closing.attach(tx);
        assert_eq!(rx.await.unwrap(), Err(SessionError::SessionClosed));
    }
}
