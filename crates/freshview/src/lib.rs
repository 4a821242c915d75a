#![forbid(unsafe_code)]

//! freshview public facade crate.
//!
//! Re-exports the change tracking, memoized selection and data freshness
//! primitives behind one dependency.
//!
//! ```
//! use freshview::prelude::*;
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let queue = TimerQueue::lab(&clock);
//! let timer = FreshnessTimer::from_millis(queue.clone(), 100.0).unwrap();
//!
//! queue.advance(Duration::from_millis(100));
//! assert!(!timer.is_fresh());
//! timer.refresh();
//! assert!(timer.is_fresh());
//! ```

pub use freshview_core::{ConfigError, EqualityError, SubscriberError};

pub mod prelude {
    pub use freshview_core as core;
    pub use freshview_runtime as runtime;

    pub use freshview_core::{LabClock, Scheduler, TimeSource, TimerId, TimerQueue};
    pub use freshview_runtime::{
        ContextSelector, ContextStore, ContextWatcher, DataFreshness, Equality, Evaluation,
        FreshnessConfig, FreshnessState, FreshnessTimer, Listener, SelectorMemo, SelectorSet,
        Subscription, VersionTracker,
    };
}
