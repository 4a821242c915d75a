//! Injectable scheduling capability.
//!
//! Primitives that need delayed work take a [`Scheduler`] instead of
//! reaching for ambient timers. [`TimerQueue`] is the single-threaded
//! implementation: the host event loop calls [`TimerQueue::run_due`] each
//! tick (sleeping until [`TimerQueue::next_deadline`] in between), and tests
//! drive it with a [`LabClock`] through [`TimerQueue::advance`].
//!
//! # Invariants
//!
//! 1. Tasks fire in deadline order; equal deadlines fire in scheduling order.
//! 2. A cancelled task never fires. Cancelling twice is a no-op.
//! 3. No queue borrow is held while a task runs, so tasks may schedule and
//!    cancel re-entrantly.
//! 4. Under a lab clock, `advance` moves time to each task's deadline before
//!    running it, so `now()` inside a task equals its deadline.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use freshview_core::clock::LabClock;
//! use freshview_core::scheduler::{Scheduler, TimerQueue};
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let queue = TimerQueue::lab(&clock);
//! let fired = Rc::new(Cell::new(false));
//! let flag = Rc::clone(&fired);
//! queue.schedule(Duration::from_millis(100), Box::new(move || flag.set(true)));
//!
//! queue.advance(Duration::from_millis(99));
//! assert!(!fired.get());
//! queue.advance(Duration::from_millis(1));
//! assert!(fired.get());
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use web_time::{Duration, Instant};

use crate::clock::{LabClock, TimeSource};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Handle identifying one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw numeric id (for tracing).
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// The capability to run a task after a delay.
pub trait Scheduler {
    /// Current time as seen by this scheduler.
    fn now(&self) -> Instant;

    /// Run `task` once `delay` has elapsed. A delay whose deadline cannot
    /// be represented yields an id for a task that never fires.
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending task. Returns `true` if it was still pending.
    fn cancel(&self, id: TimerId) -> bool;
}

// ─── TimerQueue ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct QueueInner {
    next_id: u64,
    by_deadline: BTreeMap<(Instant, TimerId), Task>,
    deadlines: HashMap<TimerId, Instant>,
}

impl QueueInner {
    fn pop_due(&mut self, now: Instant) -> Option<Task> {
        let key = *self.by_deadline.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.deadlines.remove(&key.1);
        self.by_deadline.remove(&key)
    }

    fn first_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }
}

/// Deadline-ordered, single-threaded timer queue.
///
/// Cloning a `TimerQueue` creates a new handle to the **same** queue.
#[derive(Clone)]
pub struct TimerQueue {
    inner: Rc<RefCell<QueueInner>>,
    time: TimeSource,
}

impl TimerQueue {
    /// A queue driven by wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_time_source(TimeSource::Real)
    }

    /// A queue driven by a lab clock.
    #[must_use]
    pub fn lab(clock: &LabClock) -> Self {
        Self::with_time_source(TimeSource::Lab(clock.clone()))
    }

    #[must_use]
    pub fn with_time_source(time: TimeSource) -> Self {
        Self {
            inner: Rc::new(RefCell::new(QueueInner::default())),
            time,
        }
    }

    /// Number of tasks still waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().by_deadline.len()
    }

    /// Earliest pending deadline, if any. Hosts sleep until this instant.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.borrow().first_deadline()
    }

    /// Run every task whose deadline has passed. Returns how many ran.
    ///
    /// Tasks scheduled by a running task with a deadline that has already
    /// passed run in the same call.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.time.now();
            let task = self.inner.borrow_mut().pop_due(now);
            let Some(task) = task else {
                break;
            };
            task();
            ran += 1;
        }
        if ran > 0 {
            tracing::trace!(ran, "timer queue ran due tasks");
        }
        ran
    }

    /// Advance a lab clock by `delta`, firing each due task at its own
    /// deadline. Returns how many tasks ran.
    ///
    /// Under a real time source the clock cannot be moved and this is
    /// equivalent to [`run_due`](Self::run_due).
    pub fn advance(&self, delta: Duration) -> usize {
        let TimeSource::Lab(clock) = &self.time else {
            return self.run_due();
        };
        let target = clock.now() + delta;
        let mut ran = 0;
        loop {
            let next = self.inner.borrow().first_deadline();
            match next {
                Some(deadline) if deadline <= target => {
                    clock.advance_to(deadline);
                    if clock.now() < deadline {
                        // Lab offset saturated; nothing further can come due.
                        break;
                    }
                    ran += self.run_due();
                }
                _ => break,
            }
        }
        clock.advance_to(target);
        ran
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TimerQueue")
            .field("pending", &inner.by_deadline.len())
            .field("next_deadline", &inner.first_deadline())
            .field("lab", &self.time.is_lab())
            .finish()
    }
}

impl Scheduler for TimerQueue {
    fn now(&self) -> Instant {
        self.time.now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let deadline = self.time.now().checked_add(delay);
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = TimerId(inner.next_id);
        let Some(deadline) = deadline else {
            tracing::warn!(
                timer_id = id.get(),
                delay_secs = delay.as_secs(),
                "deadline not representable, task will never fire"
            );
            return id;
        };
        inner.by_deadline.insert((deadline, id), task);
        inner.deadlines.insert(id, deadline);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        match inner.deadlines.remove(&id) {
            Some(deadline) => inner.by_deadline.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
