#![forbid(unsafe_code)]

//! Equality semantics used to decide whether a watched value changed.
//!
//! Two modes are supported:
//!
//! - [`Equality::Reference`]: strict identity. Scalars compare by value
//!   (`Number` with IEEE `==`, strings by content); containers compare by
//!   storage identity. Additionally, two NaN numbers are treated as equal so
//!   a watcher on a constant NaN settles.
//! - [`Equality::Deep`]: structural comparison of nested lists and maps.
//!
//! [`deep_clone`] produces a snapshot that shares no container storage with
//! its source, which is what deep watchers store so that in-place mutation of
//! the live value is still detected.
//!
//! # Invariants
//!
//! 1. Both comparisons are total: every pair of values yields a bool.
//! 2. `equals(a, a, mode)` is true for every `a` and mode (NaN included).
//! 3. `deep_equals(&v, &deep_clone(&v))` is true for every `v`.
//! 4. No container reachable from `deep_clone(&v)` shares storage with a
//!    container reachable from `v`.
//! 5. Cyclic structures terminate in both `deep_equals` and `deep_clone`.

use std::collections::{HashMap, HashSet};

use crate::value::{List, Map, Value};

/// How a watcher decides that its value is unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Equality {
    /// Strict identity, with NaN considered equal to NaN.
    #[default]
    Reference,
    /// Structural equality of nested containers.
    Deep,
}

impl Equality {
    /// Compare `new` against `old` under this mode.
    #[must_use]
    pub fn equals(self, new: &Value, old: &Value) -> bool {
        equals(new, old, self)
    }
}

/// Decide whether `new` and `old` are "unchanged" under `mode`.
#[must_use]
pub fn equals(new: &Value, old: &Value, mode: Equality) -> bool {
    match mode {
        Equality::Deep => deep_equals(new, old),
        Equality::Reference => strict_equals(new, old) || (new.is_nan() && old.is_nan()),
    }
}

/// Strict equality: scalars by value, containers by identity.
///
/// NaN is unequal to itself here; see [`equals`] for the NaN-tolerant form.
#[must_use]
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => x.ptr_eq(y),
        (Value::Map(x), Value::Map(y)) => x.ptr_eq(y),
        _ => false,
    }
}

/// Structural equality of two values.
#[must_use]
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    DeepCompare::default().eq(a, b)
}

/// Copy `value` so that no container storage is shared with the source.
#[must_use]
pub fn deep_clone(value: &Value) -> Value {
    DeepCopy::default().copy(value)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Pairs of containers currently being compared; a revisited pair is assumed
/// equal so cyclic structures terminate.
#[derive(Default)]
struct DeepCompare {
    in_progress: HashSet<(usize, usize)>,
}

impl DeepCompare {
    fn eq(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
            (Value::List(x), Value::List(y)) => self.lists(x, y),
            (Value::Map(x), Value::Map(y)) => self.maps(x, y),
            _ => strict_equals(a, b),
        }
    }

    fn lists(&mut self, x: &List, y: &List) -> bool {
        if x.ptr_eq(y) {
            return true;
        }
        let key = (x.addr(), y.addr());
        if !self.in_progress.insert(key) {
            return true;
        }
        let (xs, ys) = (x.to_vec(), y.to_vec());
        let result = xs.len() == ys.len() && xs.iter().zip(&ys).all(|(a, b)| self.eq(a, b));
        self.in_progress.remove(&key);
        result
    }

    fn maps(&mut self, x: &Map, y: &Map) -> bool {
        if x.ptr_eq(y) {
            return true;
        }
        let key = (x.addr(), y.addr());
        if !self.in_progress.insert(key) {
            return true;
        }
        let (xs, ys) = (x.to_btree_map(), y.to_btree_map());
        let result = xs.len() == ys.len()
            && xs
                .iter()
                .all(|(k, a)| ys.get(k).is_some_and(|b| self.eq(a, b)));
        self.in_progress.remove(&key);
        result
    }
}

/// Memo of already-copied containers keyed by source storage address.
#[derive(Default)]
struct DeepCopy {
    copies: HashMap<usize, Value>,
}

impl DeepCopy {
    fn copy(&mut self, value: &Value) -> Value {
        match value {
            Value::List(list) => {
                if let Some(done) = self.copies.get(&list.addr()) {
                    return done.clone();
                }
                let fresh = List::new();
                self.copies.insert(list.addr(), Value::List(fresh.clone()));
                for item in list.to_vec() {
                    let copied = self.copy(&item);
                    fresh.push(copied);
                }
                Value::List(fresh)
            }
            Value::Map(map) => {
                if let Some(done) = self.copies.get(&map.addr()) {
                    return done.clone();
                }
                let fresh = Map::new();
                self.copies.insert(map.addr(), Value::Map(fresh.clone()));
                for (key, item) in map.to_btree_map() {
                    let copied = self.copy(&item);
                    fresh.insert(key, copied);
                }
                Value::Map(fresh)
            }
            scalar => scalar.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_mode_treats_nan_as_unchanged() {
        assert!(equals(&Value::nan(), &Value::nan(), Equality::Reference));
        assert!(!strict_equals(&Value::nan(), &Value::nan()));
    }

    #[test]
    fn reference_mode_compares_containers_by_identity() {
        let a = Value::list([1, 2]);
        let b = Value::list([1, 2]);
        assert!(!equals(&a, &b, Equality::Reference));
        assert!(equals(&a, &a.clone(), Equality::Reference));
    }

    #[test]
    fn reference_mode_compares_strings_by_content() {
        assert!(equals(&Value::from("abc"), &Value::from("abc"), Equality::Reference));
        assert!(!equals(&Value::from("abc"), &Value::from("abd"), Equality::Reference));
    }

    #[test]
    fn undefined_and_null_are_distinct() {
        assert!(!equals(&Value::Undefined, &Value::Null, Equality::Reference));
        assert!(!equals(&Value::Undefined, &Value::Null, Equality::Deep));
    }

    #[test]
    fn deep_mode_compares_structure() {
        let a = Value::map([("xs", Value::list([1, 2])), ("n", Value::nan())]);
        let b = Value::map([("xs", Value::list([1, 2])), ("n", Value::nan())]);
        assert!(equals(&a, &b, Equality::Deep));

        if let Some(Value::List(xs)) = b.as_map().and_then(|m| m.get("xs")) {
            xs.push(3);
        }
        assert!(!equals(&a, &b, Equality::Deep));
    }

    #[test]
    fn deep_mode_detects_missing_keys() {
        let a = Value::map([("a", 1), ("b", 2)]);
        let b = Value::map([("a", 1), ("c", 2)]);
        assert!(!deep_equals(&a, &b));
    }

    #[test]
    fn deep_clone_does_not_alias() {
        let inner = List::from_vec(vec![Value::from(1)]);
        let original = Value::list([Value::List(inner.clone())]);
        let copy = deep_clone(&original);
        assert!(deep_equals(&original, &copy));

        inner.push(2);
        assert!(!deep_equals(&original, &copy));
    }

    #[test]
    fn deep_clone_preserves_shared_substructure() {
        let shared = List::from_vec(vec![Value::from(1)]);
        let original = Value::list([Value::List(shared.clone()), Value::List(shared.clone())]);
        let copy = deep_clone(&original);
        let items = copy.as_list().map(List::to_vec).unwrap_or_default();
        match (&items[0], &items[1]) {
            (Value::List(a), Value::List(b)) => {
                assert!(a.ptr_eq(b));
                assert!(!a.ptr_eq(&shared));
            }
            other => panic!("unexpected copy shape: {other:?}"),
        }
    }

    #[test]
    fn cyclic_structures_terminate() {
        let a = List::new();
        a.push(Value::List(a.clone()));
        let b = List::new();
        b.push(Value::List(b.clone()));

        assert!(deep_equals(&Value::List(a.clone()), &Value::List(b.clone())));
        let copy = deep_clone(&Value::List(a.clone()));
        assert!(deep_equals(&copy, &Value::List(a.clone())));

        // Break the cycles so storage is released.
        if let Value::List(c) = &copy {
            c.truncate(0);
        }
        a.truncate(0);
        b.truncate(0);
    }

    #[test]
    fn equality_default_is_reference() {
        assert_eq!(Equality::default(), Equality::Reference);
    }
}
