#![forbid(unsafe_code)]

//! Watcher records, the per-scope registry, and deregistration handles.
//!
//! # Design
//!
//! Watchers live in a `Vec` sorted by [`WatcherId`], which is assigned from a
//! monotonic counter, so insertion order and id order coincide. A sweep walks
//! the registry with a cursor (`next_after(last_visited_id)`) instead of an
//! index. Removing an already-visited watcher therefore never causes a
//! not-yet-visited one to be skipped, and watchers added mid-sweep are
//! picked up by the same sweep.
//!
//! Each [`Watcher`] is held behind an `Rc`: the sweep keeps its own clone
//! while calling user code, so a listener may deregister itself safely.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use scope_core::{Equality, Value};

use super::expression::{Expression, Listener};
use super::scope::ScopeInner;

/// Identity of a registered watcher. Ids increase with registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The last value a watcher saw.
pub(crate) enum Snapshot {
    /// Never evaluated. Unequal to every value, so the first check fires.
    Uninitialized,
    Seen(Value),
}

pub(crate) struct Watcher {
    pub(crate) id: WatcherId,
    pub(crate) expression: Box<dyn Expression>,
    pub(crate) listener: Box<dyn Listener>,
    pub(crate) equality: Equality,
    pub(crate) last: RefCell<Snapshot>,
}

#[derive(Default)]
pub(crate) struct Registry {
    watchers: RefCell<Vec<Rc<Watcher>>>,
    next_id: Cell<u64>,
}

impl Registry {
    pub(crate) fn insert(
        &self,
        expression: Box<dyn Expression>,
        listener: Box<dyn Listener>,
        equality: Equality,
    ) -> WatcherId {
        let id = WatcherId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.watchers.borrow_mut().push(Rc::new(Watcher {
            id,
            expression,
            listener,
            equality,
            last: RefCell::new(Snapshot::Uninitialized),
        }));
        id
    }

    /// Remove `id`. Returns whether it was present.
    pub(crate) fn remove(&self, id: WatcherId) -> bool {
        let removed = {
            let mut watchers = self.watchers.borrow_mut();
            match watchers.binary_search_by_key(&id, |w| w.id) {
                Ok(index) => Some(watchers.remove(index)),
                Err(_) => None,
            }
        };
        // Dropped outside the borrow: user closures may run arbitrary drops.
        removed.is_some()
    }

    /// First watcher whose id is greater than `cursor` (or the first
    /// watcher at all when `cursor` is `None`).
    pub(crate) fn next_after(&self, cursor: Option<WatcherId>) -> Option<Rc<Watcher>> {
        let watchers = self.watchers.borrow();
        let start = match cursor {
            None => 0,
            Some(id) => watchers.partition_point(|w| w.id <= id),
        };
        watchers.get(start).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.watchers.borrow().len()
    }

    /// Remove every watcher, returning them so the caller drops them
    /// outside the borrow.
    pub(crate) fn clear(&self) -> Vec<Rc<Watcher>> {
        std::mem::take(&mut *self.watchers.borrow_mut())
    }
}

/// Handle returned by every watch registration.
///
/// [`deregister`](Self::deregister) is idempotent. Clones share state, so
/// deregistering through any clone deactivates all of them. The handle does
/// not keep the scope alive.
#[derive(Clone)]
pub struct Deregistration {
    scope: Weak<ScopeInner>,
    ids: Rc<[WatcherId]>,
    active: Rc<Cell<bool>>,
}

impl fmt::Debug for Deregistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deregistration")
            .field("ids", &self.ids)
            .field("active", &self.active.get())
            .finish()
    }
}

impl Deregistration {
    pub(crate) fn new(scope: &Rc<ScopeInner>, ids: Vec<WatcherId>) -> Self {
        Self::with_flag(scope, ids, Rc::new(Cell::new(true)))
    }

    pub(crate) fn with_flag(
        scope: &Rc<ScopeInner>,
        ids: Vec<WatcherId>,
        active: Rc<Cell<bool>>,
    ) -> Self {
        Self {
            scope: Rc::downgrade(scope),
            ids: ids.into(),
            active,
        }
    }

    /// Handle for a registration that never happened (destroyed scope).
    pub(crate) fn inert() -> Self {
        Self {
            scope: Weak::new(),
            ids: Vec::new().into(),
            active: Rc::new(Cell::new(false)),
        }
    }

    /// Remove the watcher(s) this handle refers to.
    pub fn deregister(&self) {
        if !self.active.replace(false) {
            return;
        }
        let Some(inner) = self.scope.upgrade() else {
            return;
        };
        for id in self.ids.iter() {
            inner.registry.remove(*id);
        }
        inner.last_dirty.set(None);
        tracing::trace!(ids = ?self.ids, "watchers deregistered");
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Ids of the underlying watchers.
    #[must_use]
    pub fn ids(&self) -> &[WatcherId] {
        &self.ids
    }

    pub(crate) fn active_flag(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.active)
    }
}
