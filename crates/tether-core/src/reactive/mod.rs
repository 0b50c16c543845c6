#![forbid(unsafe_code)]

//! Fine-grained reactive graph.
//!
//! This module provides the dependency-tracking primitives the observer
//! runtime is built on:
//!
//! - [`Observable`]: a shared, version-tracked, named value. Reads inside a
//!   tracking scope register a dependency; value-changing writes notify
//!   dependents.
//! - [`Computed`]: a memoized derivation that tracks its own reads.
//! - [`Reaction`]: a named tracking scope that fires a callback when anything
//!   read during its last [`track`](Reaction::track) later changes.
//! - [`untracked`] and [`batch`]: scoped modifiers for reads and writes.
//!
//! # Architecture
//!
//! Everything is single-threaded (`Rc`/`RefCell`). A thread-local stack of
//! tracking frames records which atoms are read; the innermost frame wins.
//! A derivation binds its new dependency set only after its tracked function
//! returns, so writes performed *during* the function are delivered to the
//! dependency set of the previous run.
//!
//! # Invariants
//!
//! 1. Atoms hold their observers strongly: a subscribed reaction stays alive
//!    until it is disposed or re-tracked away from the atom.
//! 2. A reaction fires its callback at most once between two `track` calls.
//! 3. A reaction never fires after `dispose()`.
//! 4. A computed that loses its last observer drops its own dependencies.
//! 5. Setting a value equal to the current value is a no-op.

mod atom;
pub mod computed;
pub mod observable;
pub mod reaction;
mod tracking;

pub use computed::Computed;
pub use observable::Observable;
pub use reaction::Reaction;
pub use tracking::{batch, in_batch, is_tracking, untracked};
