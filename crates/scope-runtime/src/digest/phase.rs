#![forbid(unsafe_code)]

//! Phase tracking.
//!
//! At most one phase is active per scope. [`PhaseGuard::begin`] hands out an
//! RAII token that clears the phase when dropped, so an early return or a
//! propagated error can never leave the scope stuck in a phase.

use std::cell::Cell;
use std::fmt;

use crate::error::ScopeError;

/// What a scope is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Inside [`Scope::digest`](crate::Scope::digest).
    Digest,
    /// Evaluating the expression passed to [`Scope::apply`](crate::Scope::apply).
    Apply,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Digest => "digest",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub(crate) struct PhaseGuard {
    current: Cell<Option<Phase>>,
}

impl PhaseGuard {
    /// Enter `phase`, failing if any phase is already active.
    pub(crate) fn begin(&self, phase: Phase) -> Result<ActivePhase<'_>, ScopeError> {
        if let Some(active) = self.current.get() {
            return Err(ScopeError::PhaseConflict {
                active,
                requested: phase,
            });
        }
        self.current.set(Some(phase));
        Ok(ActivePhase { guard: self })
    }

    pub(crate) fn current(&self) -> Option<Phase> {
        self.current.get()
    }

    pub(crate) fn clear(&self) {
        self.current.set(None);
    }
}

/// Token for an active phase; clears it on drop.
#[must_use = "the phase ends as soon as this token is dropped"]
pub(crate) struct ActivePhase<'a> {
    guard: &'a PhaseGuard,
}

impl Drop for ActivePhase<'_> {
    fn drop(&mut self) {
        self.guard.clear();
    }
}
