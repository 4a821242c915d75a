#![forbid(unsafe_code)]

//! Memoized projections of a shared source value.
//!
//! # Design
//!
//! [`SelectorMemo<S, T>`] holds a projector `Fn(&S) -> T`, an
//! [`Equality<T>`], and one cache slot. Sources are handed in as `Rc<S>` and
//! compared by allocation, so a source that was rebuilt with identical
//! contents still counts as a new source.
//!
//! Each evaluation takes one of four paths:
//!
//! | source         | cache   | action                              | outcome      |
//! |----------------|---------|-------------------------------------|--------------|
//! | any            | empty   | project, adopt                      | `Initial`    |
//! | same allocation| filled  | nothing                             | `Cached`     |
//! | new allocation | filled  | project, equal to cached: discard   | `Suppressed` |
//! | new allocation | filled  | project, not equal: adopt           | `Recomputed` |
//!
//! The `Suppressed` path is what keeps downstream consumers quiet when the
//! source object churns without a meaningful change to the projected part.
//!
//! # Invariants
//!
//! 1. The projector is never called while the source allocation is unchanged
//!    and the memo has not been invalidated.
//! 2. After a `Suppressed` evaluation the returned value is the previously
//!    adopted value itself, not the new projection.
//! 3. A memo is owned by exactly one consumer (`&mut self` evaluation).
//!
//! # Failure Modes
//!
//! - **Projector panics**: the panic propagates and the cache slot is left
//!   empty, so the next evaluation starts over as `Initial`.
//! - **Equality fails**: logged, treated as "not equal", the new value is
//!   adopted.
//! - **Source dropped**: only a `Weak` is retained, so the memo never keeps a
//!   source alive; the next source is always a new allocation.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::equality::Equality;

/// Which path an evaluation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// No prior value; projected and adopted.
    Initial,
    /// Same source allocation; projector not called.
    Cached,
    /// New source, projected value equal to the cached one; cached kept.
    Suppressed,
    /// New source, projected value differs; new value adopted.
    Recomputed,
}

impl Evaluation {
    /// Whether the memo now holds a different value than before.
    #[inline]
    #[must_use]
    pub fn changed(self) -> bool {
        matches!(self, Self::Initial | Self::Recomputed)
    }
}

/// Single-slot memo for one projection.
pub struct SelectorMemo<S: ?Sized, T> {
    project: Box<dyn Fn(&S) -> T>,
    equality: Equality<T>,
    last_source: Option<Weak<S>>,
    cached: Option<T>,
    invalidated: bool,
    projections: u64,
    adoptions: u64,
}

impl<S: ?Sized + 'static, T: PartialEq + 'static> SelectorMemo<S, T> {
    /// A memo comparing projected values with `PartialEq`.
    pub fn new(project: impl Fn(&S) -> T + 'static) -> Self {
        Self::with_equality(project, Equality::structural())
    }
}

impl<S: ?Sized + 'static, T: 'static> SelectorMemo<S, T> {
    /// A memo comparing projected values with `equality`.
    pub fn with_equality(project: impl Fn(&S) -> T + 'static, equality: Equality<T>) -> Self {
        Self {
            project: Box::new(project),
            equality,
            last_source: None,
            cached: None,
            invalidated: false,
            projections: 0,
            adoptions: 0,
        }
    }
}

impl<S: ?Sized, T> SelectorMemo<S, T> {
    fn is_current(&self, source: &Rc<S>) -> bool {
        !self.invalidated
            && self
                .last_source
                .as_ref()
                .is_some_and(|last| std::ptr::addr_eq(last.as_ptr(), Rc::as_ptr(source)))
    }

    fn project(&mut self, source: &S) -> T {
        self.projections += 1;
        (self.project)(source)
    }

    fn refresh(&mut self, source: &Rc<S>) -> (Evaluation, &T) {
        let current = self.is_current(source);
        let (outcome, value) = match self.cached.take() {
            Some(prev) if current => (Evaluation::Cached, prev),
            Some(prev) => {
                let next = self.project(source);
                if self.equality.equals(&prev, &next) {
                    (Evaluation::Suppressed, prev)
                } else {
                    self.adoptions += 1;
                    (Evaluation::Recomputed, next)
                }
            }
            None => {
                let next = self.project(source);
                self.adoptions += 1;
                (Evaluation::Initial, next)
            }
        };
        self.last_source = Some(Rc::downgrade(source));
        self.invalidated = false;
        let value: &T = self.cached.insert(value);
        (outcome, value)
    }

    /// Bring the memo up to date with `source` and report which path ran.
    pub fn evaluate(&mut self, source: &Rc<S>) -> Evaluation {
        self.refresh(source).0
    }

    /// Bring the memo up to date and borrow the current value.
    pub fn select_ref(&mut self, source: &Rc<S>) -> &T {
        self.refresh(source).1
    }

    /// Bring the memo up to date and clone the current value.
    pub fn select(&mut self, source: &Rc<S>) -> T
    where
        T: Clone,
    {
        self.refresh(source).1.clone()
    }

    /// The adopted value, without evaluating.
    #[must_use]
    pub fn cached(&self) -> Option<&T> {
        self.cached.as_ref()
    }

    /// Force the next evaluation to call the projector even for the same
    /// source. The equality gate still applies.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Drop the cached value and the remembered source.
    pub fn reset(&mut self) {
        self.cached = None;
        self.last_source = None;
        self.invalidated = false;
    }

    /// Number of projector calls so far.
    #[must_use]
    pub fn projections(&self) -> u64 {
        self.projections
    }

    /// Number of values adopted so far (initial plus recomputed).
    #[must_use]
    pub fn adoptions(&self) -> u64 {
        self.adoptions
    }

    /// The comparator in use.
    #[must_use]
    pub fn equality(&self) -> &Equality<T> {
        &self.equality
    }
}

impl<S: ?Sized, T: fmt::Debug> fmt::Debug for SelectorMemo<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorMemo")
            .field("cached", &self.cached)
            .field("equality", &self.equality)
            .field("projections", &self.projections)
            .field("adoptions", &self.adoptions)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SelectorSet
// ---------------------------------------------------------------------------

/// Named memos over the same source. Every slot keeps its own cache and
/// nothing invalidates across slots.
pub struct SelectorSet<S: ?Sized, T> {
    slots: Vec<(String, SelectorMemo<S, T>)>,
}

impl<S: ?Sized + 'static, T: 'static> SelectorSet<S, T> {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Add a slot with the default `PartialEq` comparator.
    #[must_use]
    pub fn with(self, name: impl Into<String>, project: impl Fn(&S) -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        self.with_memo(name, SelectorMemo::new(project))
    }

    /// Add a pre-built slot. A slot with the same name is replaced.
    #[must_use]
    pub fn with_memo(mut self, name: impl Into<String>, memo: SelectorMemo<S, T>) -> Self {
        self.insert(name, memo);
        self
    }

    /// Add or replace a slot.
    pub fn insert(&mut self, name: impl Into<String>, memo: SelectorMemo<S, T>) {
        let name = name.into();
        match self.slots.iter_mut().find(|(slot, _)| *slot == name) {
            Some((_, existing)) => *existing = memo,
            None => self.slots.push((name, memo)),
        }
    }

    /// Evaluate every slot against `source`, in insertion order.
    pub fn select_all(&mut self, source: &Rc<S>) -> BTreeMap<String, T>
    where
        T: Clone,
    {
        self.slots
            .iter_mut()
            .map(|(name, memo)| (name.clone(), memo.select(source)))
            .collect()
    }

    /// Evaluate one slot.
    pub fn select(&mut self, name: &str, source: &Rc<S>) -> Option<T>
    where
        T: Clone,
    {
        self.slot_mut(name).map(|memo| memo.select(source))
    }

    /// Borrow one slot, e.g. to inspect its counters.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&SelectorMemo<S, T>> {
        self.slots
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, memo)| memo)
    }

    pub fn slot_mut(&mut self, name: &str) -> Option<&mut SelectorMemo<S, T>> {
        self.slots
            .iter_mut()
            .find(|(slot, _)| slot == name)
            .map(|(_, memo)| memo)
    }

    /// Slot names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<S: ?Sized + 'static, T: 'static> Default for SelectorSet<S, T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        count: i32,
        label: String,
    }

    fn counter(count: i32) -> Rc<Counter> {
        Rc::new(Counter {
            count,
            label: "clicks".to_string(),
        })
    }

    #[test]
    fn first_evaluation_adopts() {
        let mut memo = SelectorMemo::new(|s: &Counter| s.count);
        assert!(memo.cached().is_none());
        assert_eq!(memo.evaluate(&counter(1)), Evaluation::Initial);
        assert_eq!(memo.cached(), Some(&1));
        assert_eq!(memo.adoptions(), 1);
    }

    #[test]
    fn same_source_skips_projector() {
        let calls = Rc::new(Cell::new(0u32));
        let calls_in_projector = Rc::clone(&calls);
        let mut memo = SelectorMemo::new(move |s: &Counter| {
            calls_in_projector.set(calls_in_projector.get() + 1);
            s.count
        });

        let source = counter(3);
        assert_eq!(memo.select(&source), 3);
        assert_eq!(memo.evaluate(&source), Evaluation::Cached);
        assert_eq!(memo.select(&source), 3);
        assert_eq!(calls.get(), 1);
        assert_eq!(memo.projections(), 1);
    }

    #[test]
    fn distinct_values_are_recomputed() {
        let mut memo = SelectorMemo::new(|s: &Counter| s.count);
        assert_eq!(memo.select(&counter(1)), 1);
        assert_eq!(memo.evaluate(&counter(2)), Evaluation::Recomputed);
        assert_eq!(memo.cached(), Some(&2));
        assert_eq!(memo.projections(), 2);
        assert_eq!(memo.adoptions(), 2);
    }

    #[test]
    fn equal_projection_keeps_previous_reference() {
        let mut memo = SelectorMemo::with_equality(
            |s: &Counter| Rc::new(s.label.clone()),
            Equality::by(|a: &Rc<String>, b: &Rc<String>| a == b),
        );

        let first = memo.select(&counter(1));
        let second = memo.select(&counter(2));
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(memo.adoptions(), 1);
        assert_eq!(memo.projections(), 2);
    }

    #[test]
    fn identity_equality_adopts_every_new_allocation() {
        let mut memo = SelectorMemo::with_equality(
            |s: &Counter| Rc::new(s.label.clone()),
            Equality::identity(),
        );
        let first = memo.select(&counter(1));
        let second = memo.select(&counter(1));
        assert!(!Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn suppressed_then_cached_for_new_source() {
        let mut memo = SelectorMemo::new(|s: &Counter| s.label.clone());
        let a = counter(1);
        let b = counter(2);
        memo.evaluate(&a);
        assert_eq!(memo.evaluate(&b), Evaluation::Suppressed);
        assert_eq!(memo.evaluate(&b), Evaluation::Cached);
    }

    #[test]
    fn failing_equality_forces_adoption() {
        let mut memo = SelectorMemo::with_equality(
            |s: &Counter| s.count,
            Equality::by(|_: &i32, _: &i32| -> bool { panic!("cannot compare") }),
        );
        memo.evaluate(&counter(5));
        assert_eq!(memo.evaluate(&counter(5)), Evaluation::Recomputed);
        assert_eq!(memo.adoptions(), 2);
    }

    #[test]
    fn invalidate_reprojects_but_still_gates() {
        let mut memo = SelectorMemo::new(|s: &Counter| s.count);
        let source = counter(4);
        memo.evaluate(&source);

        memo.invalidate();
        assert_eq!(memo.evaluate(&source), Evaluation::Suppressed);
        assert_eq!(memo.projections(), 2);
        assert_eq!(memo.evaluate(&source), Evaluation::Cached);
    }

    #[test]
    fn reset_starts_over() {
        let mut memo = SelectorMemo::new(|s: &Counter| s.count);
        let source = counter(4);
        memo.evaluate(&source);
        memo.reset();
        assert!(memo.cached().is_none());
        assert_eq!(memo.evaluate(&source), Evaluation::Initial);
    }

    #[test]
    fn projector_panic_empties_cache() {
        let mut memo = SelectorMemo::new(|s: &Counter| {
            assert!(s.count >= 0, "negative count");
            s.count
        });
        memo.evaluate(&counter(1));

        let bad = counter(-1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            memo.evaluate(&bad);
        }));
        assert!(result.is_err());
        assert!(memo.cached().is_none());
        assert_eq!(memo.evaluate(&counter(2)), Evaluation::Initial);
    }

    #[test]
    fn memo_does_not_keep_source_alive() {
        let mut memo = SelectorMemo::new(|s: &Counter| s.count);
        let source = counter(9);
        let weak = Rc::downgrade(&source);
        memo.evaluate(&source);
        drop(source);
        assert!(weak.upgrade().is_none());
        assert_eq!(memo.cached(), Some(&9));
    }

    #[test]
    fn unsized_sources() {
        let mut memo = SelectorMemo::new(|s: &[i32]| s.iter().sum::<i32>());
        let source: Rc<[i32]> = Rc::from(vec![1, 2, 3]);
        assert_eq!(memo.select(&source), 6);
        assert_eq!(memo.evaluate(&source), Evaluation::Cached);
    }

    #[test]
    fn evaluation_changed_flag() {
        assert!(Evaluation::Initial.changed());
        assert!(Evaluation::Recomputed.changed());
        assert!(!Evaluation::Cached.changed());
        assert!(!Evaluation::Suppressed.changed());
    }

    #[test]
    fn selector_set_slots_are_independent() {
        let mut set = SelectorSet::new()
            .with("count", |s: &Counter| s.count.to_string())
            .with("label", |s: &Counter| s.label.clone());

        let first = set.select_all(&counter(1));
        assert_eq!(first.get("count").map(String::as_str), Some("1"));
        assert_eq!(first.get("label").map(String::as_str), Some("clicks"));

        set.select_all(&counter(2));
        assert_eq!(set.slot("count").map(SelectorMemo::adoptions), Some(2));
        assert_eq!(set.slot("label").map(SelectorMemo::adoptions), Some(1));
    }

    #[test]
    fn selector_set_replaces_by_name() {
        let mut set = SelectorSet::new()
            .with("value", |s: &Counter| s.count)
            .with("value", |s: &Counter| s.count * 10);
        assert_eq!(set.len(), 1);
        assert_eq!(set.select("value", &counter(2)), Some(20));
        assert_eq!(set.select("missing", &counter(2)), None);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["value"]);
    }

    #[test]
    fn debug_format() {
        let mut memo = SelectorMemo::new(|s: &Counter| s.count);
        memo.evaluate(&counter(42));
        let dbg = format!("{memo:?}");
        assert!(dbg.contains("SelectorMemo"));
        assert!(dbg.contains("42"));
    }
}
