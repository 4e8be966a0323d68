//! Time sources and delayed tasks for ualink.
//!
//! Two small capabilities are injected wherever the client needs time:
//!
//! - [`Clock`] answers "what time is it?". The attribute cache uses it to
//!   expire entries.
//! - [`Scheduler`] runs a task once after a delay and hands back a
//!   cancellable [`TimerHandle`]. The session state machine uses it for
//!   the reactivation delay.
//!
//! Production code uses [`TokioScheduler`] together with [`SystemClock`]
//! or [`TokioClock`]. Tests use [`ManualClock`], which implements both
//! traits and only moves when told to.
//!
//! # Cancellation
//!
//! A timer fires at most once and a cancelled timer never fires. Both
//! transitions race on one atomic, so whichever of `cancel` and the
//! expiry gets there first wins:
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//!
//! use ualink_timer::{ManualClock, Scheduler};
//!
//! let clock = ManualClock::new();
//! let fired = Arc::new(AtomicU32::new(0));
//!
//! let counter = fired.clone();
//! let timer = clock.schedule(Duration::from_secs(4), Box::new(move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! }));
//!
//! // The state that asked for the delay was left early.
//! assert!(timer.cancel());
//! assert_eq!(clock.advance(Duration::from_secs(5)), 0);
//! assert_eq!(fired.load(Ordering::SeqCst), 0);
//! assert!(timer.is_cancelled());
//! ```

mod manual;

pub use manual::ManualClock;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::trace;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// A source of monotonic time.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Reads `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Reads Tokio's clock, so it follows `tokio::time::pause` and
/// `tokio::time::advance` in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

// ---------------------------------------------------------------------------
// Timer handle
// ---------------------------------------------------------------------------

/// A task run once when its timer fires.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

struct TimerState {
    state: AtomicU8,
    abort: Mutex<Option<AbortHandle>>,
}

/// Handle to a scheduled task.
///
/// Cloning the handle does not duplicate the timer; every clone controls
/// the same one. Dropping the handle does NOT cancel the timer.
#[derive(Clone)]
pub struct TimerHandle {
    inner: Arc<TimerState>,
}

impl TimerHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(TimerState {
                state: AtomicU8::new(PENDING),
                abort: Mutex::new(None),
            }),
        }
    }

    /// Cancels the timer. Returns `true` if this call stopped the task
    /// from running, `false` if it had already fired or been cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Some(abort) = self.inner.abort.lock().take() {
                abort.abort();
            }
        }
        won
    }

    /// Whether the task has run.
    pub fn is_fired(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FIRED
    }

    /// Whether the timer was cancelled before firing.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Claims the right to run the task. Only one caller ever gets `true`,
    /// and never after a successful `cancel`.
    pub(crate) fn try_fire(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set_abort(&self, abort: AbortHandle) {
        *self.inner.abort.lock() = Some(abort);
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.load(Ordering::Acquire) {
            PENDING => "pending",
            FIRED => "fired",
            _ => "cancelled",
        };
        f.debug_struct("TimerHandle").field("state", &state).finish()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Runs tasks once after a delay.
pub trait Scheduler: Send + Sync + 'static {
    /// Schedules `task` to run after `delay`. A zero delay still runs the
    /// task asynchronously, never inside this call.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        (**self).schedule(delay, task)
    }
}

/// A [`Scheduler`] backed by `tokio::time::sleep`.
///
/// Each timer is its own spawned task, so `schedule` must be called from
/// inside a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let timer = handle.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if timer.try_fire() {
                trace!(?delay, "timer fired");
                task();
            }
        });
        handle.set_abort(join.abort_handle());
        // `cancel` may have run before the abort handle was stored.
        if handle.is_cancelled() {
            join.abort();
        }
        handle
    }
}
