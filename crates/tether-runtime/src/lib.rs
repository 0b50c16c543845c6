#![forbid(unsafe_code)]

//! Runtime: binds observable tracking to a host renderer's render/commit
//! cycle.
//!
//! # Role in tether
//! The host renders a component instance any number of times, may throw
//! render attempts away, and eventually commits or unmounts. This crate
//! keeps the reactive side consistent with that: every render is tracked,
//! changes turn into update requests only once the instance is committed,
//! and tracking of attempts that never commit is disposed.
//!
//! # Primary responsibilities
//! - **ObserverInstance**: per-instance render tracking, commit and unmount
//!   bookkeeping ([`observer`]).
//! - **RoundRobinReaction**: two alternating tracking slots so a render never
//!   invalidates itself ([`round_robin`]).
//! - **ReactionTrackingRegistry**: pending records and their cleanup
//!   strategy ([`registry`]).
//! - **Update suppression** and **static rendering** switches.
//!
//! # How it fits in the system
//! `tether-core` provides the observable graph. `tether-harness` drives this
//! crate the way a host renderer would, including strict-mode double renders
//! and abandoned attempts. The `tether` facade re-exports the public surface.

pub mod config;
pub mod effects;
pub mod error;
pub mod observer;
pub mod observer_body;
pub mod registry;
pub mod round_robin;
pub mod static_rendering;
pub mod suppression;

pub use config::{CleanupConfig, StrategyPreference, finalization_supported};
pub use effects::{Disposer, InstanceEffects};
pub use error::{BoxError, ObserverError, Result};
pub use observer::{ObserverInstance, ObserverState, observer_name_for};
pub use observer_body::ObserverBody;
pub use registry::{
    CleanupStrategy, FinalizationCleanup, ReactionTrackingRegistry, RetainedMarker, StrategyKind,
    TimerCleanup, TrackingRecord, TrackingSlot, force_cleanup_now, reset_cleanup_schedule,
};
pub use round_robin::RoundRobinReaction;
pub use static_rendering::{enable_static_rendering, is_static_rendering};
pub use suppression::{
    SuppressionGuard, suppress_updates, updates_suppressed, with_suppressed_updates,
};
