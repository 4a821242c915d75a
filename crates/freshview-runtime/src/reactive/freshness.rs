#![forbid(unsafe_code)]

//! Time-based freshness tracking for cached data.
//!
//! # State machine
//!
//! ```text
//!            refresh() / set_data(changed)
//!         ┌─────────────────────────────────┐
//!         ▼                                 │
//!      FRESH ── staleness deadline ──▶ STALE
//!         ▲        (fires on_stale once)    │
//!         └─────────────────────────────────┘
//! ```
//!
//! A [`FreshnessTimer`] starts `Fresh` and arms one scheduler task for
//! `stale_after`. `refresh()` cancels that task and arms a new one, so at
//! most one staleness task per timer is ever pending. When the task fires
//! the timer turns `Stale` and calls `on_stale` once. Disposal (explicit or
//! on drop) cancels the pending task.
//!
//! # Invariants
//!
//! 1. `is_fresh()` is true iff the state is `Fresh` and less than
//!    `stale_after` has elapsed since the last refresh.
//! 2. `on_stale` runs exactly once per refresh cycle that is allowed to
//!    expire, and never after `dispose()`.
//! 3. A timer owns at most one pending scheduler task.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use freshview_core::{LabClock, TimerQueue};
//! use freshview_runtime::reactive::FreshnessTimer;
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let queue = TimerQueue::lab(&clock);
//! let stale_calls = Rc::new(Cell::new(0));
//! let calls = Rc::clone(&stale_calls);
//!
//! let timer = FreshnessTimer::from_millis(queue.clone(), 100.0)
//!     .unwrap()
//!     .on_stale(move || calls.set(calls.get() + 1));
//! assert!(timer.is_fresh());
//!
//! queue.advance(Duration::from_millis(150));
//! assert!(!timer.is_fresh());
//! assert_eq!(stale_calls.get(), 1);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use freshview_core::error::{ConfigError, Result, panic_message};
use freshview_core::scheduler::{Scheduler, TimerId};
use web_time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Validated staleness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(
    feature = "serde",
    serde(try_from = "RawFreshnessConfig", into = "RawFreshnessConfig")
)]
pub struct FreshnessConfig {
    stale_after: Duration,
}

impl FreshnessConfig {
    /// Accept any non-zero duration that can be added to the current time.
    pub fn new(stale_after: Duration) -> Result<Self> {
        if stale_after.is_zero() {
            return Err(ConfigError::NonPositiveStaleness { millis: 0.0 });
        }
        Self::checked(stale_after, stale_after.as_secs_f64() * 1000.0)
    }

    /// Accept a positive, finite number of milliseconds.
    pub fn from_millis(millis: f64) -> Result<Self> {
        if !millis.is_finite() {
            return Err(ConfigError::NonFiniteStaleness { millis });
        }
        if millis <= 0.0 {
            return Err(ConfigError::NonPositiveStaleness { millis });
        }
        let stale_after = Duration::try_from_secs_f64(millis / 1000.0)
            .map_err(|_| ConfigError::StalenessOutOfRange { millis })?;
        // Sub-nanosecond windows round to zero.
        if stale_after.is_zero() {
            return Err(ConfigError::NonPositiveStaleness { millis });
        }
        Self::checked(stale_after, millis)
    }

    fn checked(stale_after: Duration, millis: f64) -> Result<Self> {
        if Instant::now().checked_add(stale_after).is_none() {
            return Err(ConfigError::StalenessOutOfRange { millis });
        }
        Ok(Self { stale_after })
    }

    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    #[must_use]
    pub fn stale_after_ms(&self) -> f64 {
        self.stale_after.as_secs_f64() * 1000.0
    }
}

/// Serialized form of [`FreshnessConfig`].
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize)]
pub struct RawFreshnessConfig {
    pub stale_after_ms: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawFreshnessConfig> for FreshnessConfig {
    type Error = ConfigError;

    fn try_from(raw: RawFreshnessConfig) -> Result<Self> {
        Self::from_millis(raw.stale_after_ms)
    }
}

#[cfg(feature = "serde")]
impl From<FreshnessConfig> for RawFreshnessConfig {
    fn from(config: FreshnessConfig) -> Self {
        Self {
            stale_after_ms: config.stale_after_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// FreshnessTimer
// ---------------------------------------------------------------------------

/// Whether tracked data is within its freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessState {
    Fresh,
    Stale,
}

struct TimerInner {
    scheduler: Rc<dyn Scheduler>,
    stale_after: Duration,
    last_refreshed_at: Instant,
    state: FreshnessState,
    pending: Option<TimerId>,
    /// Bumped on every arm; a firing task whose generation is behind is
    /// ignored.
    generation: u64,
    on_stale: Option<Rc<dyn Fn()>>,
    stale_count: u64,
    disposed: bool,
}

impl TimerInner {
    fn elapsed(&self) -> Duration {
        self.scheduler
            .now()
            .checked_duration_since(self.last_refreshed_at)
            .unwrap_or(Duration::ZERO)
    }
}

/// Staleness deadline for one piece of data.
///
/// Owned by exactly one consumer. Dropping it cancels the pending task.
pub struct FreshnessTimer {
    inner: Rc<RefCell<TimerInner>>,
}

impl FreshnessTimer {
    /// Start a fresh window on `scheduler`.
    pub fn new(scheduler: impl Scheduler + 'static, config: FreshnessConfig) -> Self {
        let scheduler: Rc<dyn Scheduler> = Rc::new(scheduler);
        let now = scheduler.now();
        let timer = Self {
            inner: Rc::new(RefCell::new(TimerInner {
                scheduler,
                stale_after: config.stale_after(),
                last_refreshed_at: now,
                state: FreshnessState::Fresh,
                pending: None,
                generation: 0,
                on_stale: None,
                stale_count: 0,
                disposed: false,
            })),
        };
        timer.arm();
        timer
    }

    /// Validate `stale_after_ms` and start a fresh window.
    pub fn from_millis(scheduler: impl Scheduler + 'static, stale_after_ms: f64) -> Result<Self> {
        let config = FreshnessConfig::from_millis(stale_after_ms)?;
        Ok(Self::new(scheduler, config))
    }

    /// Set the callback run on the fresh-to-stale transition.
    #[must_use]
    pub fn on_stale(self, f: impl Fn() + 'static) -> Self {
        self.inner.borrow_mut().on_stale = Some(Rc::new(f));
        self
    }

    fn arm(&self) {
        let (scheduler, stale_after, previous, generation) = {
            let mut inner = self.inner.borrow_mut();
            inner.generation += 1;
            (
                Rc::clone(&inner.scheduler),
                inner.stale_after,
                inner.pending.take(),
                inner.generation,
            )
        };
        if let Some(id) = previous {
            scheduler.cancel(id);
        }
        let weak = Rc::downgrade(&self.inner);
        let id = scheduler.schedule(stale_after, Box::new(move || expire(&weak, generation)));
        self.inner.borrow_mut().pending = Some(id);
    }

    /// Restart the window from now.
    pub fn refresh(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                tracing::debug!("refresh ignored on disposed freshness timer");
                return;
            }
            inner.last_refreshed_at = inner.scheduler.now();
            inner.state = FreshnessState::Fresh;
        }
        self.arm();
    }

    /// Whether the data is still within its window.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        let inner = self.inner.borrow();
        inner.state == FreshnessState::Fresh && inner.elapsed() < inner.stale_after
    }

    #[must_use]
    pub fn state(&self) -> FreshnessState {
        if self.is_fresh() {
            FreshnessState::Fresh
        } else {
            FreshnessState::Stale
        }
    }

    /// Time since the last refresh.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.inner.borrow().elapsed()
    }

    /// Time left in the current window (zero once stale).
    #[must_use]
    pub fn remaining(&self) -> Duration {
        let inner = self.inner.borrow();
        if inner.state == FreshnessState::Stale {
            return Duration::ZERO;
        }
        inner.stale_after.saturating_sub(inner.elapsed())
    }

    #[must_use]
    pub fn last_refreshed_at(&self) -> Instant {
        self.inner.borrow().last_refreshed_at
    }

    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.inner.borrow().stale_after
    }

    /// How many times this timer has gone stale.
    #[must_use]
    pub fn stale_count(&self) -> u64 {
        self.inner.borrow().stale_count
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Cancel the pending task. Further `refresh()` calls are ignored.
    pub fn dispose(&self) {
        let (scheduler, pending) = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.on_stale = None;
            (Rc::clone(&inner.scheduler), inner.pending.take())
        };
        if let Some(id) = pending {
            scheduler.cancel(id);
        }
        tracing::debug!("freshness timer disposed");
    }
}

fn expire(weak: &Weak<RefCell<TimerInner>>, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let on_stale = {
        let mut inner = inner.borrow_mut();
        if inner.disposed || inner.generation != generation {
            return;
        }
        inner.pending = None;
        inner.state = FreshnessState::Stale;
        inner.stale_count += 1;
        tracing::debug!(
            stale_after_ms = inner.stale_after.as_millis() as u64,
            stale_count = inner.stale_count,
            "data went stale"
        );
        inner.on_stale.clone()
    };
    if let Some(callback) = on_stale
        && let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback()))
    {
        tracing::warn!(
            error = %panic_message(payload.as_ref()),
            "on_stale callback panicked"
        );
    }
}

impl Drop for FreshnessTimer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for FreshnessTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("FreshnessTimer")
            .field("state", &inner.state)
            .field("stale_after", &inner.stale_after)
            .field("pending", &inner.pending)
            .field("stale_count", &inner.stale_count)
            .field("disposed", &inner.disposed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DataFreshness
// ---------------------------------------------------------------------------

/// A value paired with its freshness window.
///
/// Supplying a value that differs from the held one restarts the window;
/// re-supplying an equal value does not.
pub struct DataFreshness<T> {
    data: Option<T>,
    timer: FreshnessTimer,
}

impl<T: PartialEq> DataFreshness<T> {
    /// Track data with no value yet. The window starts now.
    pub fn new(scheduler: impl Scheduler + 'static, config: FreshnessConfig) -> Self {
        Self {
            data: None,
            timer: FreshnessTimer::new(scheduler, config),
        }
    }

    /// Track `data`. The window starts now.
    pub fn with_data(scheduler: impl Scheduler + 'static, config: FreshnessConfig, data: T) -> Self {
        Self {
            data: Some(data),
            timer: FreshnessTimer::new(scheduler, config),
        }
    }

    #[must_use]
    pub fn on_stale(mut self, f: impl Fn() + 'static) -> Self {
        self.timer = self.timer.on_stale(f);
        self
    }

    /// Supply a new value. Returns `true` if it differed and the window
    /// restarted.
    pub fn set_data(&mut self, data: T) -> bool {
        if self.data.as_ref() == Some(&data) {
            return false;
        }
        self.data = Some(data);
        self.timer.refresh();
        true
    }

    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.timer.is_fresh()
    }

    pub fn refresh(&self) {
        self.timer.refresh();
    }

    #[must_use]
    pub fn timer(&self) -> &FreshnessTimer {
        &self.timer
    }

    /// Stop tracking and return the held value.
    pub fn into_data(self) -> Option<T> {
        self.timer.dispose();
        self.data
    }
}

impl<T: fmt::Debug> fmt::Debug for DataFreshness<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFreshness")
            .field("data", &self.data)
            .field("timer", &self.timer)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
