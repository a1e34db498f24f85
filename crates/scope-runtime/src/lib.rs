#![forbid(unsafe_code)]

//! Scope runtime: watchers, the digest loop, and deferred work.
//!
//! # Role
//! A [`Scope`] holds named [`Value`] fields and a set of watchers. Calling
//! [`Scope::digest`] (directly, or through [`Scope::apply`]) re-evaluates
//! every watch expression until the scope is stable, calling listeners for
//! each value that changed.
//!
//! # Primary responsibilities
//! - **Digest**: registration-ordered dirty checking with a bounded number
//!   of iterations.
//! - **Deferred work**: `eval_async`, `apply_async`, and post-digest
//!   callbacks, scheduled through a host-provided [`Schedule`].
//! - **Fault containment**: watcher and task failures are routed to a
//!   [`DiagnosticSink`] instead of aborting the digest.
//!
//! # Example
//! ```
//! use scope_runtime::{Scope, TurnQueue, Value};
//!
//! let queue = TurnQueue::new();
//! let scope = Scope::new(queue.clone());
//! scope.set("name", "world");
//! scope.watch(
//!     |s| s.get("name"),
//!     |new, _old, s| s.set("greeting", format!("hello {new}")),
//! );
//! scope.digest().unwrap();
//! assert_eq!(scope.get("greeting").as_str(), Some("hello world"));
//!
//! scope.apply_async(|s: &Scope| {
//!     s.set("name", "again");
//!     Value::Undefined
//! });
//! queue.run_until_idle(8);
//! assert_eq!(scope.get("greeting").as_str(), Some("hello again"));
//! ```

pub mod config;
pub mod diagnostics;
pub mod digest;
pub mod error;
pub mod schedule;

pub use config::ScopeConfig;
pub use diagnostics::{CollectingSink, DiagnosticSink, TracingSink};
pub use digest::{
    Deregistration, Expression, Fault, Listener, Locals, Noop, Phase, Scope, ScopeBuilder,
    WatcherId, try_expr, try_listener,
};
pub use error::{DeferredKind, ErrorKind, FaultStage, ScopeError};
pub use schedule::{Schedule, Task, TurnQueue};

pub use scope_core::{Equality, List, Map, Value};
