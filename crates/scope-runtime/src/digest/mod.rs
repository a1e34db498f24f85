#![forbid(unsafe_code)]

//! Dirty-checking digest for mutable scopes.
//!
//! - [`Scope`]: shared handle to named fields plus a registry of watchers.
//! - [`Expression`] / [`Listener`]: what a watcher evaluates and how it
//!   reacts. Plain closures implement both.
//! - [`Deregistration`]: idempotent handle that removes a watch.
//! - [`Phase`]: the digest/apply state machine.
//!
//! # Architecture
//!
//! A digest repeatedly drains the `eval_async` queue and sweeps every
//! watcher in registration order. A watcher is dirty when its expression's
//! value differs from the stored snapshot under its [`Equality`] mode. Dirty
//! watchers get a new snapshot and their listener runs. The digest ends when
//! a full sweep finds nothing dirty and nothing is queued.
//!
//! A sweep stops early once it reaches the watcher that was most recently
//! dirty in the current digest and finds it clean: everything after it was
//! already clean on the previous sweep and nothing has fired since.
//!
//! # Invariants
//!
//! 1. At most one phase is active; nested `digest`/`apply` calls fail with
//!    [`ScopeError::PhaseConflict`] and change nothing.
//! 2. A listener's first call passes the same value as `new` and `old`.
//! 3. NaN is considered equal to NaN in both equality modes.
//! 4. Deep-mode snapshots never alias the watched value.
//! 5. A digest stays dirty for at most `digest_ttl` extra iterations before
//!    failing with [`ScopeError::NonConvergence`].
//!
//! # Failure Modes
//!
//! - Expression and listener faults are reported to the
//!   [`DiagnosticSink`](crate::DiagnosticSink) and the sweep continues.
//! - After [`Scope::destroy`], registrations return inert handles and
//!   `digest` is a no-op.
//!
//! [`Equality`]: scope_core::Equality
//! [`ScopeError::PhaseConflict`]: crate::ScopeError::PhaseConflict
//! [`ScopeError::NonConvergence`]: crate::ScopeError::NonConvergence

mod collection;
mod deferred;
pub mod expression;
mod phase;
mod scope;
mod watcher;

pub use expression::{
    Expression, Fault, Listener, Locals, Noop, TryExpr, TryListener, try_expr, try_listener,
};
pub use phase::Phase;
pub use scope::{Scope, ScopeBuilder};
pub use watcher::{Deregistration, WatcherId};
