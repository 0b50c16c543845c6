#![forbid(unsafe_code)]

//! Timer-loop cleanup.
//!
//! Pending records sit in a scan table keyed by slot. Each one carries a
//! deadline `cleanup_at = registered + retention`. A scan is scheduled
//! `scan_interval` after the first registration; it disposes every record
//! whose deadline has passed and reschedules itself while entries remain.
//! The host drives scans through [`CleanupStrategy::poll`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use ahash::AHashMap;
use tether_core::Clock;
use tracing::debug;
use web_time::Instant;

use super::record::{RetainedMarker, SlotId, TrackingRecord, TrackingSlot};
use super::{CleanupStrategy, StrategyKind};
use crate::config::CleanupConfig;
use crate::round_robin::RoundRobinReaction;

struct Entry {
    slot: Rc<TrackingSlot>,
    record: Rc<TrackingRecord>,
}

pub struct TimerCleanup {
    clock: Clock,
    retention: Duration,
    scan_interval: Duration,
    table: RefCell<AHashMap<SlotId, Entry>>,
    next_scan: Cell<Option<Instant>>,
    sweeping: Cell<bool>,
}

impl TimerCleanup {
    #[must_use]
    pub fn new(config: &CleanupConfig, clock: Clock) -> Self {
        Self {
            clock,
            retention: config.retention,
            scan_interval: config.scan_interval,
            table: RefCell::new(AHashMap::new()),
            next_scan: Cell::new(None),
            sweeping: Cell::new(false),
        }
    }

    /// When the next scan is due, if one is scheduled.
    #[must_use]
    pub fn next_scan_at(&self) -> Option<Instant> {
        self.next_scan.get()
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    fn ensure_scheduled(&self, now: Instant) {
        if self.next_scan.get().is_none() {
            self.next_scan.set(Some(now + self.scan_interval));
        }
    }

    /// Dispose every entry whose deadline has passed, then reschedule if
    /// anything is left. Returns the number of records disposed.
    pub fn scan(&self) -> usize {
        if self.sweeping.replace(true) {
            return 0;
        }
        self.next_scan.set(None);
        let now = self.clock.now();

        let expired: Vec<Entry> = {
            let mut table = self.table.borrow_mut();
            table.retain(|_, entry| !entry.record.is_disposed());
            let ids: Vec<SlotId> = table
                .iter()
                .filter(|(_, entry)| entry.record.cleanup_at().is_some_and(|at| now >= at))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| table.remove(&id)).collect()
        };

        let mut disposed = 0;
        for entry in &expired {
            if entry.record.dispose() {
                disposed += 1;
            }
            entry.slot.clear_if(&entry.record);
        }

        let remaining = self.table.borrow().len();
        if remaining > 0 {
            self.ensure_scheduled(now);
        }
        debug!(disposed, pending = remaining, "cleanup scan finished");
        self.sweeping.set(false);
        disposed
    }
}

impl CleanupStrategy for TimerCleanup {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Timer
    }

    fn add_reaction_to_track(
        &self,
        slot: &Rc<TrackingSlot>,
        reaction: RoundRobinReaction,
        _marker: &RetainedMarker,
    ) -> Rc<TrackingRecord> {
        let now = self.clock.now();
        let record = Rc::new(TrackingRecord::new(slot.id(), reaction));
        record.set_cleanup_at(Some(now + self.retention));
        slot.set(Rc::clone(&record));
        let previous = self.table.borrow_mut().insert(
            slot.id(),
            Entry {
                slot: Rc::clone(slot),
                record: Rc::clone(&record),
            },
        );
        // A slot only re-registers once its previous record is gone.
        if let Some(previous) = previous {
            previous.record.dispose();
        }
        self.ensure_scheduled(now);
        debug!(
            slot = slot.id().get(),
            pending = self.table.borrow().len(),
            "tracking record registered"
        );
        record
    }

    fn record_reaction_as_committed(&self, slot: &TrackingSlot, _marker: &RetainedMarker) {
        if let Some(entry) = self.table.borrow_mut().remove(&slot.id()) {
            entry.record.set_cleanup_at(None);
            debug!(slot = slot.id().get(), "tracking record committed");
        }
    }

    fn forget(&self, record: &TrackingRecord, _marker: &RetainedMarker) {
        let mut table = self.table.borrow_mut();
        let owned = table
            .get(&record.slot())
            .is_some_and(|entry| std::ptr::eq(Rc::as_ptr(&entry.record), record));
        if owned {
            table.remove(&record.slot());
        }
    }

    fn force_cleanup_now(&self) {
        self.scan();
    }

    fn reset_cleanup_schedule(&self) {
        self.next_scan.set(None);
        let entries: Vec<Entry> = self.table.borrow_mut().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.record.dispose();
            entry.slot.clear_if(&entry.record);
        }
        debug!(disposed = entries.len(), "cleanup schedule reset");
    }

    fn poll(&self) {
        if self.next_scan.get().is_some_and(|due| self.clock.now() >= due) {
            self.scan();
        }
    }

    fn pending_count(&self) -> usize {
        self.table.borrow().len()
    }
}

impl std::fmt::Debug for TimerCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerCleanup")
            .field("retention", &self.retention)
            .field("scan_interval", &self.scan_interval)
            .field("pending", &self.table.borrow().len())
            .field("next_scan", &self.next_scan.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{LabClock, Observable};

    fn setup(retention_ms: u64, scan_ms: u64) -> (TimerCleanup, LabClock) {
        let lab = LabClock::new();
        let config = CleanupConfig::default()
            .with_retention(Duration::from_millis(retention_ms))
            .with_scan_interval(Duration::from_millis(scan_ms));
        (TimerCleanup::new(&config, Clock::lab(&lab)), lab)
    }

    fn add(strategy: &TimerCleanup, slot: &Rc<TrackingSlot>, x: &Observable<i32>) -> Rc<TrackingRecord> {
        let record = strategy.add_reaction_to_track(
            slot,
            RoundRobinReaction::new("observer(T)", || {}),
            &RetainedMarker::new(),
        );
        record.reaction().track(|| x.get());
        record
    }

    #[test]
    fn expired_record_is_disposed_by_poll() {
        let (strategy, lab) = setup(100, 50);
        let x = Observable::new(0);
        let slot = TrackingSlot::new();
        let record = add(&strategy, &slot, &x);

        lab.advance(Duration::from_millis(50));
        strategy.poll();
        // Scan ran but the record is still inside its window.
        assert!(!record.is_disposed());
        assert_eq!(strategy.pending_count(), 1);
        assert!(strategy.next_scan_at().is_some());

        lab.advance(Duration::from_millis(50));
        strategy.poll();
        assert!(record.is_disposed());
        assert!(slot.is_empty());
        assert!(!x.is_observed());
        assert!(strategy.next_scan_at().is_none());
    }

    #[test]
    fn poll_before_due_does_nothing() {
        let (strategy, lab) = setup(10, 100);
        let x = Observable::new(0);
        let record = add(&strategy, &TrackingSlot::new(), &x);
        lab.advance(Duration::from_millis(99));
        strategy.poll();
        assert!(!record.is_disposed());
    }

    #[test]
    fn force_respects_deadline() {
        let (strategy, lab) = setup(100, 100);
        let x = Observable::new(0);
        let record = add(&strategy, &TrackingSlot::new(), &x);

        strategy.force_cleanup_now();
        assert!(!record.is_disposed());

        lab.advance(Duration::from_millis(100));
        strategy.force_cleanup_now();
        assert!(record.is_disposed());
    }

    #[test]
    fn commit_at_exact_boundary_survives() {
        let (strategy, lab) = setup(100, 100);
        let x = Observable::new(0);
        let slot = TrackingSlot::new();
        let record = add(&strategy, &slot, &x);

        lab.advance(Duration::from_millis(100));
        strategy.record_reaction_as_committed(&slot, &RetainedMarker::new());
        strategy.force_cleanup_now();
        assert!(!record.is_disposed());
        assert_eq!(record.cleanup_at(), None);
        assert!(x.is_observed());
    }

    #[test]
    fn reset_disposes_all_pending() {
        let (strategy, _lab) = setup(100, 100);
        let x = Observable::new(0);
        let a = add(&strategy, &TrackingSlot::new(), &x);
        let b = add(&strategy, &TrackingSlot::new(), &x);

        strategy.reset_cleanup_schedule();
        assert!(a.is_disposed());
        assert!(b.is_disposed());
        assert_eq!(strategy.pending_count(), 0);
        assert!(strategy.next_scan_at().is_none());
        assert!(!x.is_observed());
    }

    #[test]
    fn forget_removes_only_the_owned_entry() {
        let (strategy, _lab) = setup(100, 100);
        let x = Observable::new(0);
        let slot = TrackingSlot::new();
        let record = add(&strategy, &slot, &x);
        let stranger = TrackingRecord::new(slot.id(), RoundRobinReaction::new("other", || {}));

        let marker = RetainedMarker::new();
        strategy.forget(&stranger, &marker);
        assert_eq!(strategy.pending_count(), 1);
        strategy.forget(&record, &marker);
        assert_eq!(strategy.pending_count(), 0);
    }
}
