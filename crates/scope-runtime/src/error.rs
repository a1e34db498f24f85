#![forbid(unsafe_code)]

//! Errors surfaced by scope operations.
//!
//! Only three conditions make a public operation fail: a phase conflict, a
//! digest that does not converge, and a fault raised by the caller's own
//! expression in [`Scope::eval`](crate::Scope::eval) /
//! [`Scope::apply`](crate::Scope::apply). Faults raised by watchers and
//! deferred work are contained and handed to the
//! [`DiagnosticSink`](crate::DiagnosticSink) instead.

use std::fmt;

use thiserror::Error;

use crate::digest::{Fault, Phase, WatcherId};

/// Which half of a watcher raised a contained fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStage {
    Expression,
    Listener,
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression => f.write_str("expression"),
            Self::Listener => f.write_str("listener"),
        }
    }
}

/// Which deferred queue a contained fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredKind {
    EvalAsync,
    ApplyAsync,
}

impl fmt::Display for DeferredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EvalAsync => f.write_str("eval_async task"),
            Self::ApplyAsync => f.write_str("apply_async thunk"),
        }
    }
}

/// Errors from scope operations and contained faults.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// A digest or apply was started while another phase was active.
    #[error("cannot start {requested}: {active} already in progress")]
    PhaseConflict { active: Phase, requested: Phase },

    /// The digest stayed dirty for more than `ttl` iterations.
    #[error("digest did not converge within {ttl} iterations (last fired: {last_fired:?})")]
    NonConvergence {
        ttl: u32,
        last_fired: Vec<WatcherId>,
    },

    /// The caller's expression failed inside `eval` or `apply`.
    #[error("expression failed: {0}")]
    Expression(#[source] Fault),

    /// A watch expression or listener failed during a sweep.
    #[error("watcher {watcher} {stage} failed: {source}")]
    WatchFault {
        watcher: WatcherId,
        stage: FaultStage,
        #[source]
        source: Fault,
    },

    /// A deferred task or thunk failed while being drained.
    #[error("{task} failed: {source}")]
    DeferredFault {
        task: DeferredKind,
        #[source]
        source: Fault,
    },
}

/// Field-less discriminant of [`ScopeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PhaseConflict,
    NonConvergence,
    Expression,
    WatchFault,
    DeferredFault,
}

impl ScopeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PhaseConflict { .. } => ErrorKind::PhaseConflict,
            Self::NonConvergence { .. } => ErrorKind::NonConvergence,
            Self::Expression(_) => ErrorKind::Expression,
            Self::WatchFault { .. } => ErrorKind::WatchFault,
            Self::DeferredFault { .. } => ErrorKind::DeferredFault,
        }
    }
}
