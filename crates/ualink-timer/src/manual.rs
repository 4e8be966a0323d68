//! A hand-driven clock for tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{Clock, Scheduler, Task, TimerHandle};

struct Pending {
    due: Instant,
    seq: u64,
    timer: TimerHandle,
    task: Task,
}

struct Inner {
    now: Instant,
    next_seq: u64,
    pending: Vec<Pending>,
    requested: Vec<Duration>,
}

/// A [`Clock`] and [`Scheduler`] whose time only moves on [`advance`].
///
/// Tasks become due when the clock reaches their deadline and run on the
/// thread calling `advance`, earliest deadline first (ties in scheduling
/// order). Tasks scheduled while others are firing run in the same
/// `advance` if they are already due.
///
/// Clones share the same time and task queue.
///
/// [`advance`]: ManualClock::advance
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<Inner>>,
}

impl ManualClock {
    /// Creates a clock starting at the current real instant.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                now: Instant::now(),
                next_seq: 0,
                pending: Vec::new(),
                requested: Vec::new(),
            })),
        }
    }

    /// Moves time forward and runs every task that became due.
    /// Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        self.inner.lock().now += by;
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it: tasks may schedule more.
            let next = {
                let mut inner = self.inner.lock();
                let now = inner.now;
                let idx = inner
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.due <= now)
                    .min_by_key(|(_, p)| (p.due, p.seq))
                    .map(|(i, _)| i);
                idx.map(|i| inner.pending.remove(i))
            };
            let Some(p) = next else { break };
            if p.timer.try_fire() {
                (p.task)();
                ran += 1;
            }
        }
        ran
    }

    /// Runs tasks that are already due without moving time.
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Every delay passed to `schedule` so far, in call order.
    pub fn requested_delays(&self) -> Vec<Duration> {
        self.inner.lock().requested.clone()
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .pending
            .iter()
            .filter(|p| !p.timer.is_cancelled())
            .count()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }
}

impl Scheduler for ManualClock {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let timer = TimerHandle::new();
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let due = inner.now + delay;
        inner.requested.push(delay);
        inner.pending.push(Pending {
            due,
            seq,
            timer: timer.clone(),
            task,
        });
        timer
    }
}
