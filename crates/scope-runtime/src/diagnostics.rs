#![forbid(unsafe_code)]

//! Diagnostic sinks for contained faults.
//!
//! Faults raised by watch expressions, listeners, and deferred work never
//! abort a digest. They are handed to the scope's [`DiagnosticSink`], as are
//! errors from digests the scope schedules on its own (where no caller is
//! around to receive them).

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{ErrorKind, ScopeError};

/// Receiver of non-fatal scope errors.
pub trait DiagnosticSink {
    fn report(&self, error: ScopeError);
}

impl<F> DiagnosticSink for F
where
    F: Fn(ScopeError),
{
    fn report(&self, error: ScopeError) {
        self(error);
    }
}

/// Default sink: logs every report at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, error: ScopeError) {
        tracing::error!(kind = ?error.kind(), error = %error, "contained scope fault");
    }
}

/// Sink that keeps every report, for inspection in tests.
///
/// Cloning a `CollectingSink` shares the recorded list.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    errors: Rc<RefCell<Vec<ScopeError>>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.borrow().is_empty()
    }

    /// Kinds of the recorded errors, in report order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.errors.borrow().iter().map(ScopeError::kind).collect()
    }

    /// Rendered messages of the recorded errors, in report order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.borrow().iter().map(ToString::to_string).collect()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<ScopeError> {
        std::mem::take(&mut *self.errors.borrow_mut())
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, error: ScopeError) {
        self.errors.borrow_mut().push(error);
    }
}
