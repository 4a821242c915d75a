#![forbid(unsafe_code)]

//! Runtime: version tracking, memoized selectors, freshness timers, and the
//! state container that ties them together.

pub mod reactive;

pub use reactive::{
    ContextSelector, ContextStore, ContextWatcher, DataFreshness, Equality, Evaluation,
    FreshnessConfig, FreshnessState, FreshnessTimer, Listener, SelectorMemo, SelectorSet,
    Subscription, VersionTracker,
};
