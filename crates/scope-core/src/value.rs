#![forbid(unsafe_code)]

//! Dynamic values observed by watch expressions.
//!
//! # Design
//!
//! [`Value`] is a small dynamic type. Scalars (`Undefined`, `Null`, `Bool`,
//! `Number`, `Str`) are compared by value. Containers ([`List`] and [`Map`])
//! are handles to shared, interior-mutable storage: cloning a handle yields a
//! second reference to the **same** storage, and mutating through either
//! handle is visible through both. This gives containers reference identity,
//! which is what [`Equality::Reference`](crate::Equality::Reference) observes.
//!
//! # Invariants
//!
//! 1. `Value::clone()` never copies container storage. Use
//!    [`deep_clone`](crate::deep_clone) for an independent snapshot.
//! 2. `List::ptr_eq` / `Map::ptr_eq` hold exactly when both handles share
//!    storage.
//! 3. `PartialEq` on `Value` is structural equality (see
//!    [`deep_equals`](crate::deep_equals)), so `NaN == NaN` holds.
//!
//! # Failure Modes
//!
//! - **Re-entrant mutation**: mutating a container from inside its own
//!   [`List::with`] / [`Map::with`] closure panics (RefCell borrow rules).
//! - **Cycles**: a container that (transitively) contains itself leaks its
//!   storage. Equality and deep clone terminate on cycles; `Debug` output is
//!   depth-limited.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Depth at which `Display`/`Debug` stop descending into containers.
const FORMAT_DEPTH_LIMIT: usize = 16;

/// A dynamically typed observed value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value (an unset field).
    #[default]
    Undefined,
    /// Explicit empty value.
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(List),
    Map(Map),
}

impl Value {
    /// The numeric not-a-number value.
    #[must_use]
    pub fn nan() -> Self {
        Self::Number(f64::NAN)
    }

    /// Build a list value from an iterator of convertible items.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::List(List::from_vec(items.into_iter().map(Into::into).collect()))
    }

    /// Build a map value from an iterator of key/value pairs.
    pub fn map<I, K, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<Value>,
    {
        Self::Map(Map::from_entries(entries))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True only for `Number(NaN)`.
    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Number(n) if n.is_nan())
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Short type name, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        crate::equality::deep_equals(self, other)
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Map(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(List::from_vec(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Shared, interior-mutable sequence of values.
///
/// Cloning a `List` creates a new handle to the **same** storage.
#[derive(Clone, Default)]
pub struct List {
    items: Rc<RefCell<Vec<Value>>>,
}

impl List {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            items: Rc::new(RefCell::new(items)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Element at `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Replace the element at `index`, padding with `Undefined` when the
    /// index is past the end.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let mut items = self.items.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value.into();
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.items.borrow_mut().push(value.into());
    }

    pub fn pop(&self) -> Option<Value> {
        self.items.borrow_mut().pop()
    }

    pub fn truncate(&self, len: usize) {
        self.items.borrow_mut().truncate(len);
    }

    /// Copy the current elements out (element handles are shared).
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    /// Access the elements by reference.
    ///
    /// # Panics
    ///
    /// Panics if the closure mutates this same list.
    pub fn with<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        f(&self.items.borrow())
    }

    /// Whether both handles share storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.items, &other.items)
    }

    /// Storage address, used for cycle bookkeeping.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.items).cast::<()>() as usize
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, self, 0, true)
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// Shared, interior-mutable string-keyed map of values.
///
/// Keys iterate in sorted order. Cloning a `Map` creates a new handle to the
/// **same** storage.
#[derive(Clone, Default)]
pub struct Map {
    entries: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl Map {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<Value>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Rc::new(RefCell::new(entries)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Insert or replace an entry, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.borrow_mut().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.borrow_mut().remove(key)
    }

    /// Keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Copy the current entries out (value handles are shared).
    #[must_use]
    pub fn to_btree_map(&self) -> BTreeMap<String, Value> {
        self.entries.borrow().clone()
    }

    /// Access the entries by reference.
    ///
    /// # Panics
    ///
    /// Panics if the closure mutates this same map.
    pub fn with<R>(&self, f: impl FnOnce(&BTreeMap<String, Value>) -> R) -> R {
        f(&self.entries.borrow())
    }

    /// Whether both handles share storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.entries).cast::<()>() as usize
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_map(f, self, 0, true)
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, 0, true)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, 0, false)
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, depth: usize, quote: bool) -> fmt::Result {
    match value {
        Value::Undefined => f.write_str("undefined"),
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Number(n) => write_number(f, *n),
        Value::Str(s) if quote => write!(f, "{:?}", &**s),
        Value::Str(s) => f.write_str(s),
        Value::List(list) => write_list(f, list, depth, quote),
        Value::Map(map) => write_map(f, map, depth, quote),
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, list: &List, depth: usize, quote: bool) -> fmt::Result {
    if depth >= FORMAT_DEPTH_LIMIT {
        return f.write_str("[…]");
    }
    let Ok(items) = list.items.try_borrow() else {
        return f.write_str("[<borrowed>]");
    };
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_value(f, item, depth + 1, quote)?;
    }
    f.write_str("]")
}

fn write_map(f: &mut fmt::Formatter<'_>, map: &Map, depth: usize, quote: bool) -> fmt::Result {
    if depth >= FORMAT_DEPTH_LIMIT {
        return f.write_str("{…}");
    }
    let Ok(entries) = map.entries.try_borrow() else {
        return f.write_str("{<borrowed>}");
    };
    f.write_str("{")?;
    for (i, (key, item)) in entries.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{key}: ")?;
        write_value(f, item, depth + 1, quote)?;
    }
    f.write_str("}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
