#![forbid(unsafe_code)]

//! The scope: named fields, the watcher registry, and the digest loop.
//!
//! # Design
//!
//! [`Scope`] is a cheap `Rc` handle; clones share the same state. Deferred
//! tasks and [`Deregistration`] handles hold a `Weak` reference, so dropping
//! every `Scope` clone frees the scope even with work still queued.
//!
//! No `RefCell` borrow of scope state is held across a call into user code.
//! Every expression, listener, and deferred task may freely read and write
//! fields, register or remove watchers, and queue more work.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use scope_core::{Equality, Value, deep_clone};
use web_time::Instant;

use crate::config::ScopeConfig;
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::error::{FaultStage, ScopeError};
use crate::schedule::Schedule;

use super::expression::{Expression, Listener, Locals};
use super::phase::{Phase, PhaseGuard};
use super::watcher::{Deregistration, Registry, Snapshot, Watcher, WatcherId};

/// Expression queued by [`Scope::eval_async`].
pub(crate) struct AsyncTask {
    pub(crate) expression: Box<dyn Expression>,
}

/// Expression queued by [`Scope::apply_async`].
pub(crate) struct ApplyThunk {
    pub(crate) expression: Box<dyn Expression>,
}

pub(crate) type PostDigest = Box<dyn FnOnce(&Scope)>;

pub(crate) struct ScopeInner {
    pub(crate) config: ScopeConfig,
    pub(crate) fields: RefCell<BTreeMap<String, Value>>,
    pub(crate) registry: Registry,
    /// Most recent watcher found dirty in the current digest.
    pub(crate) last_dirty: Cell<Option<WatcherId>>,
    pub(crate) phase: PhaseGuard,
    pub(crate) async_queue: RefCell<VecDeque<AsyncTask>>,
    pub(crate) apply_async_queue: RefCell<VecDeque<ApplyThunk>>,
    /// A deferred `apply_async` flush is scheduled and not yet run.
    pub(crate) apply_async_pending: Cell<bool>,
    pub(crate) post_digest_queue: RefCell<VecDeque<PostDigest>>,
    pub(crate) scheduler: Rc<dyn Schedule>,
    pub(crate) sink: Rc<dyn DiagnosticSink>,
    pub(crate) destroyed: Cell<bool>,
    pub(crate) digests: Cell<u64>,
}

/// Handle to a mutable scope with dirty-checking watchers.
#[derive(Clone)]
pub struct Scope {
    pub(crate) inner: Rc<ScopeInner>,
}

/// Builder for [`Scope`].
pub struct ScopeBuilder {
    config: ScopeConfig,
    scheduler: Rc<dyn Schedule>,
    sink: Rc<dyn DiagnosticSink>,
}

impl ScopeBuilder {
    /// Start a builder that defers work through `scheduler`.
    pub fn new(scheduler: impl Schedule + 'static) -> Self {
        Self {
            config: ScopeConfig::default(),
            scheduler: Rc::new(scheduler),
            sink: Rc::new(TracingSink),
        }
    }

    #[must_use]
    pub fn config(mut self, config: ScopeConfig) -> Self {
        self.config = config;
        self
    }

    /// Where contained faults go. Default: [`TracingSink`].
    #[must_use]
    pub fn sink(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.sink = Rc::new(sink);
        self
    }

    #[must_use]
    pub fn build(self) -> Scope {
        Scope {
            inner: Rc::new(ScopeInner {
                config: self.config.sanitized(),
                fields: RefCell::new(BTreeMap::new()),
                registry: Registry::default(),
                last_dirty: Cell::new(None),
                phase: PhaseGuard::default(),
                async_queue: RefCell::new(VecDeque::new()),
                apply_async_queue: RefCell::new(VecDeque::new()),
                apply_async_pending: Cell::new(false),
                post_digest_queue: RefCell::new(VecDeque::new()),
                scheduler: self.scheduler,
                sink: self.sink,
                destroyed: Cell::new(false),
                digests: Cell::new(0),
            }),
        }
    }
}

#[derive(Default)]
struct Sweep {
    dirty: bool,
    fired: Vec<WatcherId>,
}

impl Scope {
    /// Scope with default configuration and the [`TracingSink`].
    pub fn new(scheduler: impl Schedule + 'static) -> Self {
        ScopeBuilder::new(scheduler).build()
    }

    pub fn builder(scheduler: impl Schedule + 'static) -> ScopeBuilder {
        ScopeBuilder::new(scheduler)
    }

    #[must_use]
    pub fn config(&self) -> &ScopeConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    /// Value of field `name`, or `Undefined` if absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.inner
            .fields
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .fields
            .borrow_mut()
            .insert(name.into(), value.into());
    }

    /// Replace field `name` with `f(current)`.
    pub fn update(&self, name: &str, f: impl FnOnce(&Value) -> Value) {
        let next = f(&self.get(name));
        self.set(name, next);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.inner.fields.borrow_mut().remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.fields.borrow().contains_key(name)
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Watch registration
    // ------------------------------------------------------------------

    /// Watch `watch_fn` with reference equality.
    pub fn watch<W, L>(&self, watch_fn: W, listener: L) -> Deregistration
    where
        W: Fn(&Scope) -> Value + 'static,
        L: Fn(&Value, &Value, &Scope) + 'static,
    {
        self.watch_with(watch_fn, listener, Equality::Reference)
    }

    /// Watch `watch_fn` with deep (structural) equality. The stored snapshot
    /// is a deep copy, so later mutation of the watched value is detected.
    pub fn watch_deep<W, L>(&self, watch_fn: W, listener: L) -> Deregistration
    where
        W: Fn(&Scope) -> Value + 'static,
        L: Fn(&Value, &Value, &Scope) + 'static,
    {
        self.watch_with(watch_fn, listener, Equality::Deep)
    }

    /// General registration form.
    ///
    /// Registration resets the digest short-circuit marker, so a watcher
    /// added mid-digest is always evaluated.
    pub fn watch_with(
        &self,
        expression: impl Expression + 'static,
        listener: impl Listener + 'static,
        equality: Equality,
    ) -> Deregistration {
        if self.is_destroyed() {
            return Deregistration::inert();
        }
        let id = self
            .inner
            .registry
            .insert(Box::new(expression), Box::new(listener), equality);
        self.inner.last_dirty.set(None);
        tracing::trace!(watcher = %id, ?equality, "watcher registered");
        Deregistration::new(&self.inner, vec![id])
    }

    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner.registry.len()
    }

    // ------------------------------------------------------------------
    // Digest
    // ------------------------------------------------------------------

    /// The active phase, if any.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        self.inner.phase.current()
    }

    /// Number of digests that have converged on this scope.
    #[must_use]
    pub fn digest_count(&self) -> u64 {
        self.inner.digests.get()
    }

    /// Run watchers until none is dirty and the `eval_async` queue is empty.
    ///
    /// Fails with [`ScopeError::PhaseConflict`] when called from inside a
    /// digest or apply, and with [`ScopeError::NonConvergence`] when the
    /// scope stays dirty past the configured TTL. Faults raised by watchers
    /// and queued tasks go to the diagnostic sink.
    pub fn digest(&self) -> Result<(), ScopeError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let inner = &self.inner;
        let phase = inner.phase.begin(Phase::Digest)?;
        inner.last_dirty.set(None);

        let _span = tracing::debug_span!("digest", ttl = inner.config.digest_ttl).entered();
        let started = Instant::now();

        if inner.apply_async_pending.get() {
            self.flush_apply_async();
        }

        let mut ttl = inner.config.digest_ttl;
        let mut iterations: u32 = 0;
        loop {
            self.drain_async_queue();
            let sweep = self.digest_once();
            iterations += 1;

            let pending = !inner.async_queue.borrow().is_empty();
            if !sweep.dirty && !pending {
                break;
            }
            if ttl == 0 {
                tracing::warn!(iterations, fired = ?sweep.fired, "digest did not converge");
                return Err(ScopeError::NonConvergence {
                    ttl: inner.config.digest_ttl,
                    last_fired: sweep.fired,
                });
            }
            ttl -= 1;
        }

        drop(phase);
        inner.digests.set(inner.digests.get() + 1);
        tracing::debug!(
            iterations,
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "digest converged"
        );
        self.run_post_digest();
        Ok(())
    }

    /// One pass over the registry in registration order.
    fn digest_once(&self) -> Sweep {
        let mut sweep = Sweep::default();
        let mut cursor = None;
        while let Some(watcher) = self.inner.registry.next_after(cursor) {
            cursor = Some(watcher.id);
            match self.check_watcher(&watcher) {
                Ok(true) => {
                    sweep.dirty = true;
                    sweep.fired.push(watcher.id);
                }
                Ok(false) => {
                    if self.inner.last_dirty.get() == Some(watcher.id) {
                        tracing::trace!(watcher = %watcher.id, "sweep short-circuited");
                        break;
                    }
                }
                Err(error) => self.report(error),
            }
        }
        sweep
    }

    /// Evaluate one watcher, firing its listener on change.
    ///
    /// Returns whether the watcher was dirty.
    fn check_watcher(&self, watcher: &Watcher) -> Result<bool, ScopeError> {
        let new = watcher
            .expression
            .evaluate(self, &Locals::default())
            .map_err(|source| ScopeError::WatchFault {
                watcher: watcher.id,
                stage: FaultStage::Expression,
                source,
            })?;

        let old = {
            let last = watcher.last.borrow();
            match &*last {
                Snapshot::Seen(old) if watcher.equality.equals(&new, old) => return Ok(false),
                Snapshot::Seen(old) => Some(old.clone()),
                Snapshot::Uninitialized => None,
            }
        };

        self.inner.last_dirty.set(Some(watcher.id));
        let stored = match watcher.equality {
            Equality::Deep => deep_clone(&new),
            Equality::Reference => new.clone(),
        };
        *watcher.last.borrow_mut() = Snapshot::Seen(stored);
        tracing::trace!(watcher = %watcher.id, "watcher dirty");

        let old = old.unwrap_or_else(|| new.clone());
        watcher
            .listener
            .on_change(&new, &old, self)
            .map_err(|source| ScopeError::WatchFault {
                watcher: watcher.id,
                stage: FaultStage::Listener,
                source,
            })?;
        Ok(true)
    }

    /// Evaluate `expression` against this scope right now.
    ///
    /// A fault raised by the expression is returned as
    /// [`ScopeError::Expression`].
    pub fn eval(
        &self,
        expression: impl Expression,
        locals: Option<&Locals>,
    ) -> Result<Value, ScopeError> {
        let empty = Locals::default();
        expression
            .evaluate(self, locals.unwrap_or(&empty))
            .map_err(ScopeError::Expression)
    }

    /// Run `f` once after the next digest completes, with the phase
    /// already cleared. Callbacks run in registration order.
    pub fn post_digest(&self, f: impl FnOnce(&Scope) + 'static) {
        if self.is_destroyed() {
            return;
        }
        self.inner.post_digest_queue.borrow_mut().push_back(Box::new(f));
    }

    fn run_post_digest(&self) {
        loop {
            let Some(callback) = self.inner.post_digest_queue.borrow_mut().pop_front() else {
                break;
            };
            callback(self);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Remove every watcher and drop queued work. Later registrations and
    /// deferred calls are ignored, and `digest` becomes a no-op.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.replace(true) {
            return;
        }
        let watchers = inner.registry.clear();
        let tasks = std::mem::take(&mut *inner.async_queue.borrow_mut());
        let thunks = std::mem::take(&mut *inner.apply_async_queue.borrow_mut());
        let callbacks = std::mem::take(&mut *inner.post_digest_queue.borrow_mut());
        inner.apply_async_pending.set(false);
        inner.last_dirty.set(None);
        tracing::debug!(
            watchers = watchers.len(),
            dropped_tasks = tasks.len() + thunks.len() + callbacks.len(),
            "scope destroyed"
        );
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub(crate) fn report(&self, error: ScopeError) {
        self.inner.sink.report(error);
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ScopeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("fields", &self.inner.fields.borrow().len())
            .field("watchers", &self.watcher_count())
            .field("phase", &self.phase())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
