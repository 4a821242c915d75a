//! Time sources for freshness tracking.
//!
//! Production code reads `web_time::Instant::now()`. Tests hand a
//! [`LabClock`] to the scheduler instead, so staleness windows elapse only
//! when the test says so.
//!
//! # Example
//!
//! ```
//! use freshview_core::clock::{LabClock, TimeSource};
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let source = TimeSource::Lab(clock.clone());
//! let start = source.now();
//!
//! clock.advance(Duration::from_millis(150));
//! assert_eq!(source.now() - start, Duration::from_millis(150));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, Instant};

// ─── Time source ─────────────────────────────────────────────────────────────

/// Where "now" comes from.
#[derive(Debug, Clone, Default)]
pub enum TimeSource {
    /// Real wall-clock time.
    #[default]
    Real,
    /// Deterministic lab clock for testing.
    Lab(LabClock),
}

impl TimeSource {
    /// Current time according to this source.
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::Real => Instant::now(),
            Self::Lab(clock) => clock.now(),
        }
    }

    /// Whether this source is a lab clock.
    #[inline]
    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self, Self::Lab(_))
    }
}

// ─── LabClock ────────────────────────────────────────────────────────────────

/// Virtual time for deterministic tests.
///
/// The clock holds a nanosecond offset from the instant it was created and
/// only moves when told to. Clones share the offset, so a clock handed to a
/// [`TimerQueue`](crate::scheduler::TimerQueue) and the copy kept by the
/// test always agree. Any `Instant` at or after the epoch is reachable
/// exactly, so a deadline passed to [`advance_to`](Self::advance_to) is
/// never undershot. The offset saturates after roughly 584 years.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset_ns: Arc<AtomicU64>,
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl LabClock {
    /// A clock whose epoch is the current wall-clock instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let step = saturating_nanos(delta);
        // fetch_update only fails when the closure returns None.
        let _ = self
            .offset_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ns| {
                Some(ns.saturating_add(step))
            });
    }

    /// Move forward to exactly `target`. Earlier targets are ignored; lab
    /// time never runs backwards.
    pub fn advance_to(&self, target: Instant) {
        if let Some(since_epoch) = target.checked_duration_since(self.epoch) {
            self.offset_ns
                .fetch_max(saturating_nanos(since_epoch), Ordering::AcqRel);
        }
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.epoch + self.elapsed()
    }

    /// Total time advanced since construction.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}
