#![forbid(unsafe_code)]

//! Deferred evaluation: `eval_async`, `apply`, and `apply_async`.
//!
//! # Invariants
//!
//! 1. `eval_async` called outside any phase schedules exactly one digest for
//!    the batch of tasks queued before that digest runs.
//! 2. `apply_async` calls made before the scheduled flush are processed in
//!    one batch by one digest, in call order.
//! 3. A digest that starts for any other reason drains both queues first,
//!    turning an already-scheduled flush into a no-op.
//!
//! # Failure Modes
//!
//! - Deferred tasks run on a later turn with no caller to return errors to,
//!   so faults and non-convergence from those digests go to the diagnostic
//!   sink.
//! - A scheduled task that outlives every `Scope` handle does nothing.

use scope_core::Value;

use crate::error::{DeferredKind, ScopeError};

use super::expression::{Expression, Locals, try_expr};
use super::phase::Phase;
use super::scope::{ApplyThunk, AsyncTask, Scope};

impl Scope {
    /// Queue `expression` to run during the current or next digest.
    ///
    /// Outside a digest or apply, a digest is scheduled on the next turn.
    pub fn eval_async(&self, expression: impl Expression + 'static) {
        if self.is_destroyed() {
            return;
        }
        let inner = &self.inner;
        let needs_digest = inner.phase.current().is_none() && inner.async_queue.borrow().is_empty();
        if needs_digest {
            let weak = self.downgrade();
            inner.scheduler.defer(Box::new(move || {
                let Some(scope) = Scope::upgrade(&weak) else {
                    return;
                };
                if scope.inner.async_queue.borrow().is_empty() {
                    return;
                }
                tracing::debug!("eval_async flush starting digest");
                if let Err(error) = scope.digest() {
                    scope.report(error);
                }
            }));
        }
        inner.async_queue.borrow_mut().push_back(AsyncTask {
            expression: Box::new(expression),
        });
    }

    /// Run every queued `eval_async` task, including ones queued meanwhile.
    pub(crate) fn drain_async_queue(&self) {
        let locals = Locals::default();
        loop {
            let Some(task) = self.inner.async_queue.borrow_mut().pop_front() else {
                break;
            };
            if let Err(source) = task.expression.evaluate(self, &locals) {
                self.report(ScopeError::DeferredFault {
                    task: DeferredKind::EvalAsync,
                    source,
                });
            }
        }
    }

    /// Evaluate `expression` in the apply phase, then digest.
    ///
    /// The digest runs even if the expression fails. A digest error takes
    /// precedence over an expression fault; the fault is then reported to
    /// the sink. Called from inside a digest or apply, returns
    /// [`ScopeError::PhaseConflict`] without evaluating anything.
    pub fn apply(&self, expression: impl Expression) -> Result<Value, ScopeError> {
        if self.is_destroyed() {
            return Ok(Value::Undefined);
        }
        let outcome = {
            let _phase = self.inner.phase.begin(Phase::Apply)?;
            expression.evaluate(self, &Locals::default())
        };
        let digested = self.digest();
        match (outcome, digested) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(source), Ok(())) => Err(ScopeError::Expression(source)),
            (Ok(_), Err(error)) => Err(error),
            (Err(source), Err(error)) => {
                self.report(ScopeError::Expression(source));
                Err(error)
            }
        }
    }

    /// Queue `expression` to be applied on a later turn, coalescing with
    /// other `apply_async` calls made before then.
    pub fn apply_async(&self, expression: impl Expression + 'static) {
        if self.is_destroyed() {
            return;
        }
        let inner = &self.inner;
        inner.apply_async_queue.borrow_mut().push_back(ApplyThunk {
            expression: Box::new(expression),
        });
        if inner.apply_async_pending.replace(true) {
            return;
        }
        let weak = self.downgrade();
        inner.scheduler.defer(Box::new(move || {
            let Some(scope) = Scope::upgrade(&weak) else {
                return;
            };
            if !scope.inner.apply_async_pending.get() {
                tracing::trace!("apply_async batch already flushed");
                return;
            }
            let flush = try_expr(|scope, _| {
                scope.flush_apply_async();
                Ok(Value::Undefined)
            });
            if let Err(error) = scope.apply(flush) {
                scope.report(error);
            }
        }));
    }

    /// Run every queued `apply_async` thunk in call order.
    pub(crate) fn flush_apply_async(&self) {
        let locals = Locals::default();
        let mut flushed = 0usize;
        loop {
            let Some(thunk) = self.inner.apply_async_queue.borrow_mut().pop_front() else {
                break;
            };
            flushed += 1;
            if let Err(source) = thunk.expression.evaluate(self, &locals) {
                self.report(ScopeError::DeferredFault {
                    task: DeferredKind::ApplyAsync,
                    source,
                });
            }
        }
        self.inner.apply_async_pending.set(false);
        tracing::trace!(flushed, "apply_async batch flushed");
    }
}
