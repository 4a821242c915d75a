#![forbid(unsafe_code)]

//! Pluggable equality for projected values.
//!
//! A selector decides whether a freshly projected value "meaningfully
//! changed" by asking an [`Equality<T>`]. Comparators may fail: a fallible
//! comparator returning `Err`, a panicking comparator, or a serialized
//! comparison on a value that does not serialize. Every failure is logged
//! at `WARN` and answered with "not equal", which costs one extra
//! downstream update and never keeps a stale value alive.
//!
//! # Serialized comparison
//!
//! [`Equality::serialized`] (feature `serialized-eq`) compares the
//! `serde_json::Value` forms of both operands. Object keys are sorted, so
//! field order does not matter. Known limitations:
//!
//! - Maps with non-string keys fail to serialize and compare unequal.
//! - Non-finite floats serialize as `null`, so `NaN`, `inf` and `None`
//!   compare equal to each other. Use [`Equality::structural`] for float
//!   payloads.
//! - Reference cycles (through `Rc`/`RefCell` with serde's `rc` feature) are
//!   unsupported and recurse without bound.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use freshview_core::error::{EqualityError, panic_message};

type CompareFn<T> = dyn Fn(&T, &T) -> Result<bool, EqualityError>;

/// A named, shareable equality function.
pub struct Equality<T> {
    compare: Rc<CompareFn<T>>,
    name: &'static str,
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        Self {
            compare: Rc::clone(&self.compare),
            name: self.name,
        }
    }
}

impl<T> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Equality").field(&self.name).finish()
    }
}

impl<T: PartialEq + 'static> Equality<T> {
    /// Compare with `PartialEq`. This is the selector default.
    #[must_use]
    pub fn structural() -> Self {
        Self::named("structural", |a: &T, b: &T| Ok(a == b))
    }
}

impl<T: PartialEq + 'static> Default for Equality<T> {
    fn default() -> Self {
        Self::structural()
    }
}

impl<U: ?Sized + 'static> Equality<Rc<U>> {
    /// Compare shared values by allocation, ignoring contents.
    #[must_use]
    pub fn identity() -> Self {
        Self::named("identity", |a: &Rc<U>, b: &Rc<U>| {
            Ok(std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)))
        })
    }
}

#[cfg(feature = "serialized-eq")]
impl<T: serde::Serialize + 'static> Equality<T> {
    /// Compare serialized forms. See the module docs for limitations.
    #[must_use]
    pub fn serialized() -> Self {
        Self::named("serialized", |a: &T, b: &T| {
            let left = serde_json::to_value(a)
                .map_err(|err| EqualityError::incomparable(err.to_string()))?;
            let right = serde_json::to_value(b)
                .map_err(|err| EqualityError::incomparable(err.to_string()))?;
            Ok(left == right)
        })
    }
}

impl<T: 'static> Equality<T> {
    /// Wrap an infallible predicate.
    pub fn by(f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::named("custom", move |a: &T, b: &T| Ok(f(a, b)))
    }

    /// Wrap a predicate that can report incomparable operands.
    pub fn fallible(f: impl Fn(&T, &T) -> Result<bool, EqualityError> + 'static) -> Self {
        Self::named("custom", f)
    }

    /// Treat every pair as different, so every recomputation is adopted.
    #[must_use]
    pub fn never() -> Self {
        Self::named("never", |_: &T, _: &T| Ok(false))
    }

    fn named(
        name: &'static str,
        f: impl Fn(&T, &T) -> Result<bool, EqualityError> + 'static,
    ) -> Self {
        Self {
            compare: Rc::new(f),
            name,
        }
    }
}

impl<T> Equality<T> {
    /// Comparator name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the comparator, converting a panic into an error.
    pub fn try_eq(&self, a: &T, b: &T) -> Result<bool, EqualityError> {
        match catch_unwind(AssertUnwindSafe(|| (self.compare)(a, b))) {
            Ok(result) => result,
            Err(payload) => Err(EqualityError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Run the comparator; any failure counts as "not equal".
    #[must_use]
    pub fn equals(&self, a: &T, b: &T) -> bool {
        match self.try_eq(a, b) {
            Ok(equal) => equal,
            Err(err) => {
                tracing::warn!(
                    comparator = self.name,
                    error = %err,
                    "equality check failed, treating values as different"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_uses_partial_eq() {
        let eq = Equality::<Vec<i32>>::structural();
        assert!(eq.equals(&vec![1, 2], &vec![1, 2]));
        assert!(!eq.equals(&vec![1, 2], &vec![2, 1]));
        assert_eq!(eq.name(), "structural");
    }

    #[test]
    fn identity_ignores_contents() {
        let eq = Equality::<Rc<str>>::identity();
        let a: Rc<str> = Rc::from("same");
        let b: Rc<str> = Rc::from("same");
        assert!(eq.equals(&a, &Rc::clone(&a)));
        assert!(!eq.equals(&a, &b));
    }

    #[test]
    fn custom_predicate() {
        let eq = Equality::by(|a: &String, b: &String| a.eq_ignore_ascii_case(b));
        assert!(eq.equals(&"Hello".to_string(), &"HELLO".to_string()));
    }

    #[test]
    fn fallible_error_means_not_equal() {
        let eq = Equality::fallible(|_: &i32, _: &i32| Err(EqualityError::incomparable("opaque")));
        assert!(eq.try_eq(&1, &1).is_err());
        assert!(!eq.equals(&1, &1));
    }

    #[test]
    fn panicking_comparator_means_not_equal() {
        let eq = Equality::by(|_: &i32, _: &i32| -> bool { panic!("comparator exploded") });
        match eq.try_eq(&1, &1) {
            Err(EqualityError::Panicked { message }) => assert!(message.contains("exploded")),
            other => panic!("expected panic error, got {other:?}"),
        }
        assert!(!eq.equals(&1, &1));
    }

    #[test]
    fn never_is_never_equal() {
        let eq = Equality::<u8>::never();
        assert!(!eq.equals(&3, &3));
    }

    #[cfg(feature = "serialized-eq")]
    #[test]
    fn serialized_ignores_map_insertion_order() {
        use std::collections::HashMap;

        let mut a = HashMap::new();
        a.insert("x".to_string(), 1);
        a.insert("y".to_string(), 2);
        let mut b = HashMap::new();
        b.insert("y".to_string(), 2);
        b.insert("x".to_string(), 1);

        let eq = Equality::<HashMap<String, i32>>::serialized();
        assert!(eq.equals(&a, &b));
    }

    #[cfg(feature = "serialized-eq")]
    #[test]
    fn serialized_non_string_keys_are_incomparable() {
        use std::collections::HashMap;

        let mut a = HashMap::new();
        a.insert((1, 2), "tuple key");
        let eq = Equality::<HashMap<(i32, i32), &'static str>>::serialized();
        assert!(matches!(
            eq.try_eq(&a, &a),
            Err(EqualityError::Incomparable { .. })
        ));
        assert!(!eq.equals(&a, &a));
    }
}
