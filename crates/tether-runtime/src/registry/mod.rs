#![forbid(unsafe_code)]

//! Leak tracking for render attempts that never commit.
//!
//! # Design
//!
//! The host may start a render, throw it away, and start another one for the
//! same logical component. Each attempt creates a tracking reaction that
//! subscribes to observables; an attempt that never reaches commit would
//! otherwise keep those subscriptions (and itself) alive forever.
//!
//! [`ReactionTrackingRegistry`] keeps every uncommitted [`TrackingRecord`]
//! until either the instance commits (the record becomes permanent) or the
//! cleanup strategy decides the attempt was abandoned and disposes it.
//!
//! Two strategies implement [`CleanupStrategy`]:
//!
//! - [`FinalizationCleanup`]: abandonment is observed directly, by the host
//!   dropping the instance's [`RetainedMarker`].
//! - [`TimerCleanup`]: abandonment is inferred from a missing commit within
//!   the retention window.
//!
//! The strategy is picked once per thread by [`ReactionTrackingRegistry::global`]
//! from [`CleanupConfig`] and the [`finalization_supported`] probe.
//!
//! # Invariants
//!
//! 1. A record is disposed at most once.
//! 2. A committed record is never disposed by the strategy.
//! 3. Disposing one record never clears a slot that holds a different record.

mod finalization;
mod record;
mod timer;

use std::rc::Rc;

use tether_core::Clock;
use tracing::debug;

pub use finalization::FinalizationCleanup;
pub use record::{CleanupToken, RetainedMarker, SlotId, TrackingRecord, TrackingSlot};
pub use timer::TimerCleanup;

use crate::config::{CleanupConfig, StrategyPreference, finalization_supported};
use crate::round_robin::RoundRobinReaction;

/// Which cleanup strategy is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Finalization,
    Timer,
}

/// Decide the strategy from a preference and the capability probe result.
#[must_use]
pub fn select_strategy(preference: StrategyPreference, finalization_available: bool) -> StrategyKind {
    match preference {
        StrategyPreference::Timer => StrategyKind::Timer,
        StrategyPreference::Auto | StrategyPreference::Finalization if finalization_available => {
            StrategyKind::Finalization
        }
        StrategyPreference::Auto | StrategyPreference::Finalization => StrategyKind::Timer,
    }
}

/// How uncommitted records are found and disposed.
pub trait CleanupStrategy {
    fn kind(&self) -> StrategyKind;

    /// Create a pending record for `reaction`, store it in `slot` and start
    /// watching it.
    fn add_reaction_to_track(
        &self,
        slot: &Rc<TrackingSlot>,
        reaction: RoundRobinReaction,
        marker: &RetainedMarker,
    ) -> Rc<TrackingRecord>;

    /// Stop watching the record in `slot`; it will never be auto-disposed.
    /// Any registration on `marker` is withdrawn.
    fn record_reaction_as_committed(&self, slot: &TrackingSlot, marker: &RetainedMarker);

    /// Drop bookkeeping for a record its owner disposed, including its
    /// registration on `marker`.
    fn forget(&self, record: &TrackingRecord, marker: &RetainedMarker);

    /// Run any pending cleanup immediately.
    fn force_cleanup_now(&self);

    /// Cancel scheduled work.
    fn reset_cleanup_schedule(&self);

    /// Run cleanup that has become due. Hosts call this from their event loop.
    fn poll(&self);

    /// Number of records currently watched.
    fn pending_count(&self) -> usize;
}

/// Store of uncommitted tracking records.
pub struct ReactionTrackingRegistry {
    strategy: Box<dyn CleanupStrategy>,
}

thread_local! {
    static GLOBAL: Rc<ReactionTrackingRegistry> = Rc::new(ReactionTrackingRegistry::from_config(
        &CleanupConfig::from_env(),
        finalization_supported(),
        Clock::real(),
    ));
}

impl ReactionTrackingRegistry {
    #[must_use]
    pub fn with_strategy(strategy: Box<dyn CleanupStrategy>) -> Self {
        Self { strategy }
    }

    /// A registry using reclaim-on-drop.
    #[must_use]
    pub fn finalization() -> Self {
        Self::with_strategy(Box::new(FinalizationCleanup::new()))
    }

    /// A registry using the timer scan.
    #[must_use]
    pub fn timer(config: &CleanupConfig, clock: Clock) -> Self {
        Self::with_strategy(Box::new(TimerCleanup::new(config, clock)))
    }

    /// Pick the strategy from `config` and the probe result.
    #[must_use]
    pub fn from_config(config: &CleanupConfig, finalization_available: bool, clock: Clock) -> Self {
        let kind = select_strategy(config.strategy, finalization_available);
        debug!(
            ?kind,
            preference = ?config.strategy,
            finalization_available,
            retention_ms = config.retention.as_millis() as u64,
            scan_ms = config.scan_interval.as_millis() as u64,
            "cleanup strategy selected"
        );
        match kind {
            StrategyKind::Finalization => Self::finalization(),
            StrategyKind::Timer => Self::timer(config, clock),
        }
    }

    /// This thread's shared registry, created on first use.
    #[must_use]
    pub fn global() -> Rc<Self> {
        GLOBAL.with(Rc::clone)
    }

    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn add_reaction_to_track(
        &self,
        slot: &Rc<TrackingSlot>,
        reaction: RoundRobinReaction,
        marker: &RetainedMarker,
    ) -> Rc<TrackingRecord> {
        self.strategy.add_reaction_to_track(slot, reaction, marker)
    }

    pub fn record_reaction_as_committed(&self, slot: &TrackingSlot, marker: &RetainedMarker) {
        self.strategy.record_reaction_as_committed(slot, marker);
    }

    pub fn forget(&self, record: &TrackingRecord, marker: &RetainedMarker) {
        self.strategy.forget(record, marker);
    }

    pub fn force_cleanup_now(&self) {
        self.strategy.force_cleanup_now();
    }

    pub fn reset_cleanup_schedule(&self) {
        self.strategy.reset_cleanup_schedule();
    }

    pub fn poll(&self) {
        self.strategy.poll();
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.strategy.pending_count()
    }
}

impl std::fmt::Debug for ReactionTrackingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionTrackingRegistry")
            .field("kind", &self.kind())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// [`ReactionTrackingRegistry::force_cleanup_now`] on the thread's registry.
pub fn force_cleanup_now() {
    ReactionTrackingRegistry::global().force_cleanup_now();
}

/// [`ReactionTrackingRegistry::reset_cleanup_schedule`] on the thread's
/// registry.
pub fn reset_cleanup_schedule() {
    ReactionTrackingRegistry::global().reset_cleanup_schedule();
}
