#![forbid(unsafe_code)]

//! Explicitly constructed state container and its consumer adapters.
//!
//! [`ContextStore<S>`] is the source of truth a UI layer mutates. It holds
//! the current value as an `Rc<S>` and bumps its [`VersionTracker`] on
//! every replacement. There is no global instance: the host creates a store
//! at start-up and passes clones (which share state) to whoever needs it.
//!
//! Two adapters sit on top:
//!
//! - [`ContextSelector`]: pull-based. `get()` runs a private
//!   [`SelectorMemo`] against the current source.
//! - [`ContextWatcher`]: push-based. Re-runs its memo on every version bump
//!   and calls `on_change(previous, current)` only when the memo adopted a
//!   new value.
//!
//! # Re-entrancy
//!
//! A watcher's `on_change` may mutate the store it watches. The nested bump
//! does not recurse into the watcher; it is recorded and the watcher
//! re-evaluates once the current callback returns.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::equality::Equality;
use super::selector::{Evaluation, SelectorMemo};
use super::version::{Listener, Subscription, VersionTracker};

struct StoreInner<S> {
    value: RefCell<Rc<S>>,
    tracker: VersionTracker,
}

/// Shared, versioned source-of-truth value.
///
/// Cloning a `ContextStore` creates a new handle to the **same** state.
pub struct ContextStore<S> {
    inner: Rc<StoreInner<S>>,
}

impl<S> Clone for ContextStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: 'static> ContextStore<S> {
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self::from_rc(Rc::new(initial))
    }

    #[must_use]
    pub fn from_rc(initial: Rc<S>) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                value: RefCell::new(initial),
                tracker: VersionTracker::new(),
            }),
        }
    }

    /// The current source value.
    #[must_use]
    pub fn get(&self) -> Rc<S> {
        Rc::clone(&self.inner.value.borrow())
    }

    /// Replace the source and notify subscribers. Returns the new version.
    pub fn set(&self, value: S) -> u64 {
        self.replace(Rc::new(value))
    }

    /// Replace the source with an existing allocation. Returns the new
    /// version.
    pub fn replace(&self, value: Rc<S>) -> u64 {
        let previous = std::mem::replace(&mut *self.inner.value.borrow_mut(), value);
        drop(previous);
        self.inner.tracker.increment()
    }

    /// Derive the next source from the current one.
    pub fn update(&self, f: impl FnOnce(&S) -> S) -> u64 {
        let current = self.get();
        self.set(f(&current))
    }

    /// Replace the source only if `value` differs from it. Returns whether
    /// a bump happened.
    pub fn set_if_changed(&self, value: S) -> bool
    where
        S: PartialEq,
    {
        if *self.get() == value {
            return false;
        }
        self.set(value);
        true
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.tracker.version()
    }

    #[must_use]
    pub fn tracker(&self) -> &VersionTracker {
        &self.inner.tracker
    }

    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe(&self, listener: &Listener) -> Subscription {
        self.inner.tracker.subscribe(listener)
    }

    /// A pull-based selector with `PartialEq` gating.
    pub fn select<T>(&self, project: impl Fn(&S) -> T + 'static) -> ContextSelector<S, T>
    where
        T: PartialEq + 'static,
    {
        self.select_memo(SelectorMemo::new(project))
    }

    /// A pull-based selector with a custom comparator.
    pub fn select_with<T: 'static>(
        &self,
        project: impl Fn(&S) -> T + 'static,
        equality: Equality<T>,
    ) -> ContextSelector<S, T> {
        self.select_memo(SelectorMemo::with_equality(project, equality))
    }

    pub fn select_memo<T>(&self, memo: SelectorMemo<S, T>) -> ContextSelector<S, T> {
        ContextSelector {
            store: self.clone(),
            memo,
        }
    }

    /// Watch a projection, calling `on_change(previous, current)` whenever
    /// it meaningfully changes.
    pub fn watch<T>(
        &self,
        project: impl Fn(&S) -> T + 'static,
        on_change: impl Fn(&T, &T) + 'static,
    ) -> ContextWatcher<S, T>
    where
        T: Clone + PartialEq + 'static,
    {
        ContextWatcher::new(self, SelectorMemo::new(project), on_change)
    }
}

impl<S: fmt::Debug> fmt::Debug for ContextStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("value", &self.inner.value.borrow())
            .field("version", &self.inner.tracker.version())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ContextSelector
// ---------------------------------------------------------------------------

/// A store handle paired with a private memo.
pub struct ContextSelector<S, T> {
    store: ContextStore<S>,
    memo: SelectorMemo<S, T>,
}

impl<S: 'static, T> ContextSelector<S, T> {
    /// Current projected value.
    pub fn get(&mut self) -> T
    where
        T: Clone,
    {
        let source = self.store.get();
        self.memo.select(&source)
    }

    /// Current projected value, borrowed.
    pub fn get_ref(&mut self) -> &T {
        let source = self.store.get();
        self.memo.select_ref(&source)
    }

    /// Bring the memo up to date and report which path ran.
    pub fn evaluate(&mut self) -> Evaluation {
        let source = self.store.get();
        self.memo.evaluate(&source)
    }

    #[must_use]
    pub fn memo(&self) -> &SelectorMemo<S, T> {
        &self.memo
    }

    #[must_use]
    pub fn store(&self) -> &ContextStore<S> {
        &self.store
    }
}

impl<S, T: fmt::Debug> fmt::Debug for ContextSelector<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSelector")
            .field("memo", &self.memo)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ContextWatcher
// ---------------------------------------------------------------------------

struct WatchState<S, T> {
    store: ContextStore<S>,
    memo: RefCell<SelectorMemo<S, T>>,
    /// Last value handed to `on_change` (or the baseline). Kept apart from
    /// the memo cache, which a panicking projector leaves empty.
    delivered: RefCell<Option<T>>,
    on_change: Box<dyn Fn(&T, &T)>,
    running: Cell<bool>,
    rerun: Cell<bool>,
    changes: Cell<u64>,
}

/// Clears the re-entrancy flag even if a projector or callback panics.
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<S: 'static, T: Clone> WatchState<S, T> {
    fn on_bump(&self) {
        if self.running.replace(true) {
            self.rerun.set(true);
            return;
        }
        let _guard = RunningGuard(&self.running);
        loop {
            self.rerun.set(false);
            let source = self.store.get();
            let change = {
                let mut memo = self.memo.borrow_mut();
                let outcome = memo.evaluate(&source);
                match (outcome, memo.cached().cloned()) {
                    (Evaluation::Initial | Evaluation::Recomputed, Some(current)) => {
                        let previous = self.delivered.replace(Some(current.clone()));
                        match previous {
                            // The memo already compared against its own cache.
                            Some(previous) if outcome == Evaluation::Recomputed => {
                                Some((previous, current))
                            }
                            // Cache was rebuilt from empty; compare with what
                            // consumers last saw.
                            Some(previous) if !memo.equality().equals(&previous, &current) => {
                                Some((previous, current))
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                }
            };
            if let Some((previous, current)) = change {
                self.changes.set(self.changes.get() + 1);
                (self.on_change)(&previous, &current);
            }
            if !self.rerun.get() {
                break;
            }
        }
    }
}

/// Push-based projection watcher. Dropping it unsubscribes.
pub struct ContextWatcher<S, T> {
    state: Rc<WatchState<S, T>>,
    subscription: Subscription,
}

impl<S: 'static, T: Clone + 'static> ContextWatcher<S, T> {
    /// Watch `store` through `memo`. The current projection becomes the
    /// baseline; `on_change` is not called for it.
    pub fn new(
        store: &ContextStore<S>,
        memo: SelectorMemo<S, T>,
        on_change: impl Fn(&T, &T) + 'static,
    ) -> Self {
        let state = Rc::new(WatchState {
            store: store.clone(),
            memo: RefCell::new(memo),
            delivered: RefCell::new(None),
            on_change: Box::new(on_change),
            running: Cell::new(false),
            rerun: Cell::new(false),
            changes: Cell::new(0),
        });
        let baseline = state.memo.borrow_mut().select(&store.get());
        *state.delivered.borrow_mut() = Some(baseline);

        let weak: Weak<WatchState<S, T>> = Rc::downgrade(&state);
        let listener = Listener::new(move |_| {
            if let Some(state) = weak.upgrade() {
                state.on_bump();
            }
        });
        let subscription = store.subscribe(&listener);
        Self {
            state,
            subscription,
        }
    }

    /// The last projection delivered to `on_change`, or the baseline.
    #[must_use]
    pub fn current(&self) -> Option<T> {
        self.state.delivered.borrow().clone()
    }

    /// How many times `on_change` has been called.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.state.changes.get()
    }

    /// Stop watching. Idempotent.
    pub fn unwatch(&self) {
        self.subscription.unsubscribe();
    }

    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.subscription.is_active()
    }
}

impl<S, T: fmt::Debug> fmt::Debug for ContextWatcher<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextWatcher")
            .field("memo", &self.state.memo.borrow())
            .field("changes", &self.state.changes.get())
            .field("subscription", &self.subscription)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
