#![forbid(unsafe_code)]

//! Core value model for the scope digest engine.
//!
//! Watch expressions observe [`Value`]s. This crate owns everything the
//! digest needs to know about those values and nothing about watchers:
//!
//! - [`value`]: the dynamic [`Value`] type with shared, interior-mutable
//!   [`List`] and [`Map`] containers that carry reference identity.
//! - [`equality`]: the two comparison modes ([`Equality::Reference`] and
//!   [`Equality::Deep`]) plus [`deep_clone`] for snapshotting.
//! - [`logging`]: optional JSON `tracing` subscriber setup.

pub mod equality;
#[cfg(feature = "json")]
pub mod json;
pub mod logging;
pub mod value;

pub use equality::{Equality, deep_clone, deep_equals, equals, strict_equals};
pub use value::{List, Map, Value};
