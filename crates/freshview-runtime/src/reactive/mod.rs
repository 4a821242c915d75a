#![forbid(unsafe_code)]

//! Change tracking, memoized selection, and freshness for UI state.
//!
//! This module provides the primitives a UI layer uses to avoid redundant
//! work when its state churns:
//!
//! - [`VersionTracker`]: a monotonic version counter that notifies
//!   [`Listener`]s synchronously on every bump.
//! - [`Subscription`]: RAII guard that releases its listener on drop.
//! - [`SelectorMemo`]: a single-slot memo that re-projects only when the
//!   source allocation changes and keeps the old value when the new
//!   projection is equal under its [`Equality`].
//! - [`SelectorSet`]: named memos over one source, evaluated independently.
//! - [`FreshnessTimer`] / [`DataFreshness`]: staleness deadlines driven by an
//!   injected [`Scheduler`](freshview_core::Scheduler).
//! - [`ContextStore`], [`ContextSelector`], [`ContextWatcher`]: an explicitly
//!   passed state container and the pull/push adapters over it.
//!
//! # Architecture
//!
//! Everything here is single-threaded: shared handles are `Rc<..>` with
//! `Cell`/`RefCell` interiors, and notification walks a snapshot of the
//! subscriber list instead of holding a lock. Memos and freshness timers are
//! owned by one consumer each; the tracker is the only structure shared
//! between consumers.
//!
//! # Invariants
//!
//! 1. Versions increase by exactly 1 per bump and never decrease or wrap.
//! 2. Subscribers are notified in registration order, before `increment()`
//!    returns.
//! 3. A memo never calls its projector for an unchanged source allocation.
//! 4. A freshness timer owns at most one pending scheduler task, and none
//!    after disposal.
//! 5. Every internal failure (subscriber, comparator, `on_stale`) is logged
//!    and resolved toward more work, never toward stale output.

pub mod equality;
pub mod freshness;
pub mod selector;
pub mod store;
pub mod version;

pub use equality::Equality;
#[cfg(feature = "serde")]
pub use freshness::RawFreshnessConfig;
pub use freshness::{DataFreshness, FreshnessConfig, FreshnessState, FreshnessTimer};
pub use selector::{Evaluation, SelectorMemo, SelectorSet};
pub use store::{ContextSelector, ContextStore, ContextWatcher};
pub use version::{Listener, Subscription, VersionTracker};
