#![forbid(unsafe_code)]

//! Monotonic change counter with synchronous subscriber notification.
//!
//! # Design
//!
//! [`VersionTracker`] owns a `u64` version and an ordered set of
//! [`Listener`]s. [`increment()`](VersionTracker::increment) bumps the
//! version and then calls every listener, in subscription order, before it
//! returns.
//!
//! Listener identity is the identity of the shared callback: subscribing a
//! clone of the same `Listener` twice does not add a second entry. Each
//! [`Subscription`] guard holds one claim on its entry and the entry is
//! removed when the last claim is released.
//!
//! # Invariants
//!
//! 1. The version increases by exactly 1 per `increment()` and never
//!    decreases or wraps; it saturates at `u64::MAX`.
//! 2. A listener is invoked at most once per `increment()`, however many
//!    times it was subscribed.
//! 3. Notification iterates over a snapshot taken at the start of the pass:
//!    listeners removed during the pass still run in that pass, listeners
//!    added during the pass first run on the next one.
//! 4. `Subscription::unsubscribe()` is idempotent.
//!
//! # Failure Modes
//!
//! - **Listener returns `Err` or panics**: the failure is logged at `WARN`
//!   and the remaining listeners still run. Nothing propagates to the
//!   caller of `increment()`. Panics are only isolated when the binary is
//!   built with `panic = "unwind"`.
//! - **Tracker dropped**: outstanding subscriptions become inert.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use freshview_core::error::{SubscriberError, panic_message};

type ListenerFn = dyn Fn(u64) -> Result<(), SubscriberError>;

/// A shareable change callback.
///
/// Clones refer to the same callback and are deduplicated by
/// [`VersionTracker::subscribe`].
#[derive(Clone)]
pub struct Listener {
    callback: Rc<ListenerFn>,
}

impl Listener {
    /// Wrap an infallible callback. It receives the new version.
    pub fn new(f: impl Fn(u64) + 'static) -> Self {
        Self {
            callback: Rc::new(move |version: u64| -> Result<(), SubscriberError> {
                f(version);
                Ok(())
            }),
        }
    }

    /// Wrap a callback that may report failure.
    pub fn fallible(f: impl Fn(u64) -> Result<(), SubscriberError> + 'static) -> Self {
        Self {
            callback: Rc::new(f),
        }
    }

    /// Whether both handles refer to the same callback.
    #[must_use]
    pub fn same_as(&self, other: &Listener) -> bool {
        self.addr() == other.addr()
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.callback) as *const ()
    }

    fn invoke(&self, version: u64) -> Result<(), SubscriberError> {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(version))) {
            Ok(result) => result,
            Err(payload) => Err(SubscriberError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.addr()).finish()
    }
}

struct Entry {
    id: u64,
    listener: Listener,
    /// Live `Subscription` guards referring to this entry.
    claims: usize,
}

struct TrackerInner {
    version: Cell<u64>,
    entries: RefCell<Vec<Entry>>,
    next_id: Cell<u64>,
    failures: Cell<u64>,
}

impl TrackerInner {
    fn release(&self, id: u64) {
        let mut entries = self.entries.borrow_mut();
        if let Some(pos) = entries.iter().position(|e| e.id == id) {
            entries[pos].claims -= 1;
            if entries[pos].claims == 0 {
                entries.remove(pos);
            }
        }
    }
}

/// Monotonic version counter plus subscriber set.
///
/// Cloning a `VersionTracker` creates a new handle to the **same** counter.
#[derive(Clone)]
pub struct VersionTracker {
    inner: Rc<TrackerInner>,
}

impl VersionTracker {
    /// A tracker starting at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A tracker starting at `version`.
    #[must_use]
    pub fn starting_at(version: u64) -> Self {
        Self {
            inner: Rc::new(TrackerInner {
                version: Cell::new(version),
                entries: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                failures: Cell::new(0),
            }),
        }
    }

    /// Current version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Bump the version by one and notify every subscriber synchronously.
    /// Returns the new version.
    ///
    /// A listener may call `increment()` itself. The nested pass runs to
    /// completion first, so listeners later in the outer pass receive the
    /// newer version before the older one. Compare against
    /// [`version()`](Self::version) rather than the argument when ordering
    /// matters.
    ///
    /// The counter saturates at `u64::MAX`: a bump there keeps the version,
    /// logs a warning, and still notifies.
    pub fn increment(&self) -> u64 {
        let current = self.inner.version.get();
        let version = match current.checked_add(1) {
            Some(next) => next,
            None => {
                tracing::warn!(version = current, "version counter saturated");
                current
            }
        };
        self.inner.version.set(version);

        let snapshot: Vec<(u64, Listener)> = self
            .inner
            .entries
            .borrow()
            .iter()
            .map(|e| (e.id, e.listener.clone()))
            .collect();
        tracing::trace!(version, subscribers = snapshot.len(), "version bumped");

        for (subscriber_id, listener) in snapshot {
            if let Err(err) = listener.invoke(version) {
                self.inner.failures.set(self.inner.failures.get() + 1);
                tracing::warn!(
                    version,
                    subscriber_id,
                    error = %err,
                    "subscriber failed during notification"
                );
            }
        }
        version
    }

    /// Register `listener`. Subscribing a listener that is already present
    /// adds a claim to the existing entry instead of a second entry.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe(&self, listener: &Listener) -> Subscription {
        let mut entries = self.inner.entries.borrow_mut();
        let id = match entries.iter_mut().find(|e| e.listener.same_as(listener)) {
            Some(entry) => {
                entry.claims += 1;
                entry.id
            }
            None => {
                let id = self.inner.next_id.get() + 1;
                self.inner.next_id.set(id);
                entries.push(Entry {
                    id,
                    listener: listener.clone(),
                    claims: 1,
                });
                id
            }
        };
        Subscription {
            tracker: Rc::downgrade(&self.inner),
            id,
            active: Cell::new(true),
        }
    }

    /// Register a fresh closure.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe_fn(&self, f: impl Fn(u64) + 'static) -> Subscription {
        self.subscribe(&Listener::new(f))
    }

    /// Number of distinct subscribed listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// Listener invocations that failed since construction.
    #[must_use]
    pub fn failed_notifications(&self) -> u64 {
        self.inner.failures.get()
    }
}

impl Default for VersionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VersionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionTracker")
            .field("version", &self.version())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// RAII disposer returned by [`VersionTracker::subscribe`].
///
/// Dropping it unsubscribes. [`unsubscribe()`](Self::unsubscribe) does the
/// same eagerly and may be called any number of times.
pub struct Subscription {
    tracker: Weak<TrackerInner>,
    id: u64,
    active: Cell<bool>,
}

impl Subscription {
    /// Release this subscription's claim. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(inner) = self.tracker.upgrade() {
            inner.release(self.id);
        }
    }

    /// Whether this guard still holds its claim on a live tracker.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get() && self.tracker.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
