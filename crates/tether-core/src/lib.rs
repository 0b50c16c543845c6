#![forbid(unsafe_code)]

//! Core: the observable engine and time sources consumed by the tether runtime.
//!
//! # Role in tether
//! `tether-core` owns the fine-grained dependency graph (observables,
//! computeds, tracking reactions) and the clock abstraction used by the
//! runtime's cleanup timers. The runtime (`tether-runtime`) never reaches into
//! graph internals; it only creates named [`reactive::Reaction`]s, tracks
//! functions with them, and disposes them.
//!
//! # Primary responsibilities
//! - **Reactive graph**: [`reactive::Observable`], [`reactive::Computed`],
//!   [`reactive::Reaction`], [`reactive::untracked`], [`reactive::batch`].
//! - **Clock**: [`clock::Clock`] with a deterministic [`clock::LabClock`] for
//!   tests.

pub mod clock;
pub mod reactive;

pub use clock::{Clock, LabClock};
pub use reactive::{Computed, Observable, Reaction, batch, is_tracking, untracked};
