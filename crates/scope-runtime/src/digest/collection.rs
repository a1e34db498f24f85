#![forbid(unsafe_code)]

//! Composite watches built on top of plain watchers.
//!
//! [`Scope::watch_group`] coalesces several expressions into one listener
//! call per digest. [`Scope::watch_collection`] watches the shallow contents
//! of a list or map: the underlying watcher observes a change counter, which
//! is bumped whenever an element is added, removed, or replaced by a
//! non-identical value.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use scope_core::{Equality, List, Map, Value, equals};

use super::expression::{Expression, try_expr, try_listener};
use super::scope::Scope;
use super::watcher::Deregistration;

type GroupListener = dyn Fn(&[Value], &[Value], &Scope);

struct GroupState {
    new_values: RefCell<Vec<Value>>,
    old_values: RefCell<Vec<Value>>,
    first_run: Cell<bool>,
    scheduled: Cell<bool>,
}

impl GroupState {
    fn new(len: usize) -> Self {
        Self {
            new_values: RefCell::new(vec![Value::Undefined; len]),
            old_values: RefCell::new(vec![Value::Undefined; len]),
            first_run: Cell::new(true),
            scheduled: Cell::new(false),
        }
    }

    fn record(&self, index: usize, new: &Value, old: &Value) {
        self.new_values.borrow_mut()[index] = new.clone();
        self.old_values.borrow_mut()[index] = old.clone();
    }

    fn notify(&self, listener: &GroupListener, scope: &Scope) {
        let new_values = self.new_values.borrow().clone();
        if self.first_run.replace(false) {
            listener(&new_values, &new_values, scope);
        } else {
            let old_values = self.old_values.borrow().clone();
            listener(&new_values, &old_values, scope);
        }
    }
}

enum Shadow {
    Unset,
    Scalar(Value),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

fn identical(a: &Value, b: &Value) -> bool {
    equals(a, b, Equality::Reference)
}

impl Shadow {
    /// Replace the shadow with `value`'s shallow contents, returning whether
    /// anything differed.
    fn absorb(&mut self, value: &Value) -> bool {
        match value {
            Value::List(list) => {
                let items = list.to_vec();
                let changed = match self {
                    Self::List(old) => {
                        old.len() != items.len()
                            || old.iter().zip(&items).any(|(a, b)| !identical(a, b))
                    }
                    _ => true,
                };
                *self = Self::List(items);
                changed
            }
            Value::Map(map) => {
                let entries = map.to_btree_map();
                let changed = match self {
                    Self::Map(old) => {
                        old.len() != entries.len()
                            || entries
                                .iter()
                                .any(|(key, v)| !old.get(key).is_some_and(|o| identical(o, v)))
                    }
                    _ => true,
                };
                *self = Self::Map(entries);
                changed
            }
            scalar => {
                if let Self::Scalar(old) = self {
                    if identical(old, scalar) {
                        return false;
                    }
                }
                *self = Self::Scalar(scalar.clone());
                true
            }
        }
    }
}

struct CollectionTracker {
    shadow: RefCell<Shadow>,
    latest: RefCell<Value>,
    very_old: RefCell<Value>,
    changes: Cell<u64>,
    first_run: Cell<bool>,
}

impl CollectionTracker {
    fn new() -> Self {
        Self {
            shadow: RefCell::new(Shadow::Unset),
            latest: RefCell::new(Value::Undefined),
            very_old: RefCell::new(Value::Undefined),
            changes: Cell::new(0),
            first_run: Cell::new(true),
        }
    }

    /// Compare `value` with the shadow and return the change counter.
    fn observe(&self, value: Value) -> Value {
        if self.shadow.borrow_mut().absorb(&value) {
            self.changes.set(self.changes.get() + 1);
        }
        *self.latest.borrow_mut() = value;
        Value::Number(self.changes.get() as f64)
    }

    fn react(&self, listener: &dyn Fn(&Value, &Value, &Scope), scope: &Scope) {
        let latest = self.latest.borrow().clone();
        if self.first_run.replace(false) {
            listener(&latest, &latest, scope);
        } else {
            let very_old = self.very_old.borrow().clone();
            listener(&latest, &very_old, scope);
        }
        *self.very_old.borrow_mut() = shallow_copy(&latest);
    }
}

fn shallow_copy(value: &Value) -> Value {
    match value {
        Value::List(list) => Value::List(List::from_vec(list.to_vec())),
        Value::Map(map) => Value::Map(Map::from_entries(map.to_btree_map())),
        other => other.clone(),
    }
}

impl Scope {
    /// Watch several expressions and call `listener` at most once per digest
    /// with all current values (and all previous values).
    ///
    /// With no expressions, `listener` is called once on a later turn with
    /// two empty slices, unless the group is deregistered first.
    pub fn watch_group<L>(&self, expressions: Vec<Box<dyn Expression>>, listener: L) -> Deregistration
    where
        L: Fn(&[Value], &[Value], &Scope) + 'static,
    {
        if self.is_destroyed() {
            return Deregistration::inert();
        }
        let listener: Rc<L> = Rc::new(listener);

        if expressions.is_empty() {
            let registration = Deregistration::new(&self.inner, Vec::new());
            let active = registration.active_flag();
            self.eval_async(try_expr(move |scope, _| {
                if active.get() {
                    listener(&[], &[], scope);
                }
                Ok(Value::Undefined)
            }));
            return registration;
        }

        let group = Rc::new(GroupState::new(expressions.len()));
        let active = Rc::new(Cell::new(true));
        let mut ids = Vec::with_capacity(expressions.len());

        for (index, expression) in expressions.into_iter().enumerate() {
            let group = Rc::clone(&group);
            let listener = Rc::clone(&listener);
            let active = Rc::clone(&active);
            let member = try_listener(move |new, old, scope| {
                group.record(index, new, old);
                if !group.scheduled.replace(true) {
                    let group = Rc::clone(&group);
                    let listener = Rc::clone(&listener);
                    let active = Rc::clone(&active);
                    scope.eval_async(try_expr(move |scope, _| {
                        if active.get() {
                            group.notify(&*listener, scope);
                        }
                        group.scheduled.set(false);
                        Ok(Value::Undefined)
                    }));
                }
                Ok(())
            });
            let source = try_expr(move |scope, locals| expression.evaluate(scope, locals));
            ids.push(
                self.inner
                    .registry
                    .insert(Box::new(source), Box::new(member), Equality::Reference),
            );
        }
        self.inner.last_dirty.set(None);
        tracing::trace!(members = ids.len(), "watch group registered");
        Deregistration::with_flag(&self.inner, ids, active)
    }

    /// Watch the shallow contents of the list or map returned by `watch_fn`.
    ///
    /// The listener fires when an element is added, removed, or replaced by a
    /// non-identical value. `old` is a shallow copy of the collection as of
    /// the previous listener call.
    pub fn watch_collection<W, L>(&self, watch_fn: W, listener: L) -> Deregistration
    where
        W: Fn(&Scope) -> Value + 'static,
        L: Fn(&Value, &Value, &Scope) + 'static,
    {
        let tracker = Rc::new(CollectionTracker::new());
        let observer = Rc::clone(&tracker);
        self.watch(
            move |scope| observer.observe(watch_fn(scope)),
            move |_, _, scope| tracker.react(&listener, scope),
        )
    }
}
