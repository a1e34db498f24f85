#![forbid(unsafe_code)]

//! Watch expressions and listeners.
//!
//! Plain closures are the common case: `Fn(&Scope) -> Value` is an
//! [`Expression`] and `Fn(&Value, &Value, &Scope)` is a [`Listener`]. Use
//! [`try_expr`] / [`try_listener`] when the callable can fail or needs the
//! evaluation [`Locals`].

use std::collections::BTreeMap;

use scope_core::Value;

use super::scope::Scope;

/// Failure raised by a user callable.
pub type Fault = Box<dyn std::error::Error + Send + Sync>;

/// Extra named values visible to an expression during [`Scope::eval`].
#[derive(Debug, Clone, Default)]
pub struct Locals {
    vars: BTreeMap<String, Value>,
}

impl Locals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Value bound to `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Locals {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut locals = Self::new();
        for (name, value) in iter {
            locals.insert(name, value);
        }
        locals
    }
}

/// A callable evaluated against a scope.
pub trait Expression {
    fn evaluate(&self, scope: &Scope, locals: &Locals) -> Result<Value, Fault>;
}

impl<F> Expression for F
where
    F: Fn(&Scope) -> Value,
{
    fn evaluate(&self, scope: &Scope, _locals: &Locals) -> Result<Value, Fault> {
        Ok(self(scope))
    }
}

/// Fallible expression wrapper; see [`try_expr`].
pub struct TryExpr<F>(F);

/// Wrap a fallible closure that also receives the evaluation locals.
pub fn try_expr<F>(f: F) -> TryExpr<F>
where
    F: Fn(&Scope, &Locals) -> Result<Value, Fault>,
{
    TryExpr(f)
}

impl<F> Expression for TryExpr<F>
where
    F: Fn(&Scope, &Locals) -> Result<Value, Fault>,
{
    fn evaluate(&self, scope: &Scope, locals: &Locals) -> Result<Value, Fault> {
        (self.0)(scope, locals)
    }
}

/// Reaction to a watched value changing.
///
/// On a watcher's first call `new` and `old` are the same value.
pub trait Listener {
    fn on_change(&self, new: &Value, old: &Value, scope: &Scope) -> Result<(), Fault>;
}

impl<F> Listener for F
where
    F: Fn(&Value, &Value, &Scope),
{
    fn on_change(&self, new: &Value, old: &Value, scope: &Scope) -> Result<(), Fault> {
        self(new, old, scope);
        Ok(())
    }
}

/// Fallible listener wrapper; see [`try_listener`].
pub struct TryListener<F>(F);

pub fn try_listener<F>(f: F) -> TryListener<F>
where
    F: Fn(&Value, &Value, &Scope) -> Result<(), Fault>,
{
    TryListener(f)
}

impl<F> Listener for TryListener<F>
where
    F: Fn(&Value, &Value, &Scope) -> Result<(), Fault>,
{
    fn on_change(&self, new: &Value, old: &Value, scope: &Scope) -> Result<(), Fault> {
        (self.0)(new, old, scope)
    }
}

/// Listener that does nothing. Watchers registered with it still take part
/// in dirty detection, which makes them useful for "run on every digest"
/// expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl Listener for Noop {
    fn on_change(&self, _new: &Value, _old: &Value, _scope: &Scope) -> Result<(), Fault> {
        Ok(())
    }
}
