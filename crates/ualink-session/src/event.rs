//! Events, state tags and the reactivation backoff policy.

use std::fmt;

/// Maximum delay between reactivation attempts, in seconds.
pub const MAX_REACTIVATE_DELAY_SECS: u64 = 16;

/// Everything that can move the session state machine.
///
/// Events carry no payload. Data produced along the way (the created
/// session, the activate response) lives in the state that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
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
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which phase of its life the session is in.
///
/// ```text
///              SessionRequested             CreateSucceeded
///   Inactive ──────────────────→ Creating ─────────────────→ Activating
///      ↑  ↑                         │                            │
///      │  └──── ErrCreateFailed ────┘    ActivateSucceeded       │
///      │                                 ┌───────────────────────┘
///      │ DisconnectSucceeded             ▼
///   Closing ←── DisconnectRequested ── Active ──ErrConnectionLost──→ ReactivateDelay
///                                        ↑                              │  ↑
///                       ReactivateSucceeded            ReactivateRequested  │ ErrReactivateFailed
///                                        │                              ▼  │
///                                        └──────────────────────── ReactivateExecute
/// ```
///
/// Not every edge is drawn; see `SessionState::transition` for the full
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStateKind {
    Inactive,
    CreatingSession,
    ActivatingSession,
    Active,
    ClosingSession,
    ReactivateDelay,
    ReactivateExecute,
}

impl SessionStateKind {
    /// Returns `true` only for `Active`.
    #[inline]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// Returns `true` while trying to get back to `Active` after losing the
    /// connection.
    #[inline]
    pub fn is_reactivating(self) -> bool {
        matches!(self, Self::ReactivateDelay | Self::ReactivateExecute)
    }
}

impl fmt::Display for SessionStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One completed state change, as seen by transition subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionStateKind,
    pub event: SessionEvent,
    pub to: SessionStateKind,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S({}) x E({}) = S'({})", self.from, self.event, self.to)
    }
}

/// The delay before the next reactivation attempt, given the current one.
///
/// `0 → 1`, then doubling, capped at [`MAX_REACTIVATE_DELAY_SECS`].
pub fn next_delay(delay_secs: u64) -> u64 {
    if delay_secs == 0 {
        1
    } else {
        delay_secs
            .saturating_mul(2)
            .min(MAX_REACTIVATE_DELAY_SECS)
    }
}
