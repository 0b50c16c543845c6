#![forbid(unsafe_code)]

//! tether public facade crate.
//!
//! This crate provides the stable surface area for users: the observable
//! engine from `tether-core` and, with the default `runtime` feature, the
//! observer runtime from `tether-runtime`.

pub use tether_core::{Clock, Computed, LabClock, Observable, Reaction, batch, untracked};

#[cfg(feature = "runtime")]
pub use tether_runtime::{
    CleanupConfig, ObserverBody, ObserverError, ObserverInstance, ReactionTrackingRegistry,
    enable_static_rendering, with_suppressed_updates,
};

pub mod prelude {
    pub use tether_core as core;
    #[cfg(feature = "runtime")]
    pub use tether_runtime as runtime;

    pub use tether_core::{Computed, Observable, Reaction, batch, untracked};
    #[cfg(feature = "runtime")]
    pub use tether_runtime::{ObserverInstance, with_suppressed_updates};
}
