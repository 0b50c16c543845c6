#![forbid(unsafe_code)]

//! Reclaim-on-drop cleanup.
//!
//! Every pending record gets a [`CleanupToken`] registered on the instance's
//! [`RetainedMarker`]. When the host drops an instance without committing it,
//! the marker pushes its tokens onto a reclaim queue. The queue is drained in
//! a separate step (on the next registration, on `poll`, or when forced), so
//! disposal never runs inside the drop itself.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::debug;

use super::record::{
    CleanupToken, ReclaimQueue, RetainedMarker, TrackingRecord, TrackingSlot,
};
use super::{CleanupStrategy, StrategyKind};
use crate::round_robin::RoundRobinReaction;

struct Tracked {
    slot: Weak<TrackingSlot>,
    record: Rc<TrackingRecord>,
}

pub struct FinalizationCleanup {
    queue: Rc<ReclaimQueue>,
    tracked: RefCell<AHashMap<CleanupToken, Tracked>>,
    next_token: Cell<u64>,
    sweeping: Cell<bool>,
}

impl Default for FinalizationCleanup {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizationCleanup {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Rc::new(ReclaimQueue::default()),
            tracked: RefCell::new(AHashMap::new()),
            next_token: Cell::new(1),
            sweeping: Cell::new(false),
        }
    }

    /// Tokens whose markers were dropped but which have not been reclaimed.
    #[must_use]
    pub fn queued_reclaims(&self) -> usize {
        self.queue.len()
    }

    /// Dispose every record whose marker has been dropped.
    ///
    /// Returns the number of records disposed. Re-entrant calls return 0.
    pub fn reclaim(&self) -> usize {
        if self.sweeping.replace(true) {
            return 0;
        }
        let mut disposed = 0;
        loop {
            let tokens = self.queue.drain();
            if tokens.is_empty() {
                break;
            }
            for token in tokens {
                let Some(tracked) = self.tracked.borrow_mut().remove(&token) else {
                    continue;
                };
                if tracked.record.dispose() {
                    disposed += 1;
                }
                if let Some(slot) = tracked.slot.upgrade() {
                    slot.clear_if(&tracked.record);
                }
                debug!(
                    token = token.get(),
                    reaction = %tracked.record.reaction().name(),
                    "reclaimed abandoned tracking record"
                );
            }
        }
        self.sweeping.set(false);
        disposed
    }
}

impl CleanupStrategy for FinalizationCleanup {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Finalization
    }

    fn add_reaction_to_track(
        &self,
        slot: &Rc<TrackingSlot>,
        reaction: RoundRobinReaction,
        marker: &RetainedMarker,
    ) -> Rc<TrackingRecord> {
        self.reclaim();

        let token = CleanupToken(self.next_token.get());
        self.next_token.set(token.0 + 1);

        let record = Rc::new(TrackingRecord::new(slot.id(), reaction));
        record.set_cleanup_token(Some(token));
        marker.register(token, Rc::downgrade(&self.queue));
        slot.set(Rc::clone(&record));
        self.tracked.borrow_mut().insert(
            token,
            Tracked {
                slot: Rc::downgrade(slot),
                record: Rc::clone(&record),
            },
        );
        debug!(
            token = token.get(),
            slot = slot.id().get(),
            pending = self.tracked.borrow().len(),
            "tracking record registered"
        );
        record
    }

    fn record_reaction_as_committed(&self, slot: &TrackingSlot, marker: &RetainedMarker) {
        let Some(record) = slot.get() else {
            return;
        };
        let Some(token) = record.cleanup_token() else {
            return;
        };
        record.set_cleanup_token(None);
        marker.unregister(token);
        if self.tracked.borrow_mut().remove(&token).is_some() {
            debug!(token = token.get(), slot = slot.id().get(), "tracking record committed");
        }
    }

    fn forget(&self, record: &TrackingRecord, marker: &RetainedMarker) {
        if let Some(token) = record.cleanup_token() {
            record.set_cleanup_token(None);
            marker.unregister(token);
            self.tracked.borrow_mut().remove(&token);
        }
    }

    fn force_cleanup_now(&self) {
        self.reclaim();
    }

    /// Nothing is scheduled ahead of time here; records whose markers are
    /// already gone are reclaimed now so none is left behind.
    fn reset_cleanup_schedule(&self) {
        let disposed = self.reclaim();
        debug!(disposed, "cleanup schedule reset");
    }

    fn poll(&self) {
        self.reclaim();
    }

    fn pending_count(&self) -> usize {
        self.tracked.borrow().len()
    }
}

impl std::fmt::Debug for FinalizationCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizationCleanup")
            .field("pending", &self.tracked.borrow().len())
            .field("queued", &self.queue.len())
            .field("next_token", &self.next_token.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::Observable;

    fn add(
        strategy: &FinalizationCleanup,
        slot: &Rc<TrackingSlot>,
        marker: &RetainedMarker,
        x: &Observable<i32>,
    ) -> Rc<TrackingRecord> {
        let record =
            strategy.add_reaction_to_track(slot, RoundRobinReaction::new("observer(T)", || {}), marker);
        record.reaction().track(|| x.get());
        record
    }

    #[test]
    fn tokens_start_at_one_and_increase() {
        let strategy = FinalizationCleanup::new();
        let x = Observable::new(0);
        let marker = RetainedMarker::new();
        let a = add(&strategy, &TrackingSlot::new(), &marker, &x);
        let b = add(&strategy, &TrackingSlot::new(), &marker, &x);
        assert_eq!(a.cleanup_token().map(CleanupToken::get), Some(1));
        assert_eq!(b.cleanup_token().map(CleanupToken::get), Some(2));
    }

    #[test]
    fn dropped_marker_is_reclaimed_on_next_step() {
        let strategy = FinalizationCleanup::new();
        let x = Observable::new(0);
        let slot = TrackingSlot::new();
        let marker = RetainedMarker::new();
        let record = add(&strategy, &slot, &marker, &x);
        assert!(x.is_observed());

        drop(marker);
        // Nothing is disposed inside the drop itself.
        assert!(!record.is_disposed());
        assert_eq!(strategy.queued_reclaims(), 1);

        strategy.force_cleanup_now();
        assert!(record.is_disposed());
        assert!(slot.is_empty());
        assert!(!x.is_observed());
        assert_eq!(strategy.pending_count(), 0);
    }

    #[test]
    fn committed_record_survives_marker_drop() {
        let strategy = FinalizationCleanup::new();
        let x = Observable::new(0);
        let slot = TrackingSlot::new();
        let marker = RetainedMarker::new();
        let record = add(&strategy, &slot, &marker, &x);

        strategy.record_reaction_as_committed(&slot, &marker);
        assert_eq!(strategy.pending_count(), 0);
        assert_eq!(marker.registration_count(), 0);
        drop(marker);
        assert_eq!(strategy.queued_reclaims(), 0);
        strategy.force_cleanup_now();
        assert!(!record.is_disposed());
        assert!(x.is_observed());
    }

    #[test]
    fn reset_never_strands_dropped_markers() {
        let strategy = FinalizationCleanup::new();
        let x = Observable::new(0);
        let slot = TrackingSlot::new();
        let marker = RetainedMarker::new();
        let record = add(&strategy, &slot, &marker, &x);

        drop(marker);
        strategy.reset_cleanup_schedule();
        strategy.force_cleanup_now();
        strategy.poll();
        assert!(record.is_disposed());
        assert!(slot.is_empty());
        assert!(!x.is_observed());
        assert_eq!(strategy.pending_count(), 0);
        assert_eq!(strategy.queued_reclaims(), 0);
    }

    #[test]
    fn forget_withdraws_marker_registration() {
        let strategy = FinalizationCleanup::new();
        let x = Observable::new(0);
        let marker = RetainedMarker::new();
        let failed = add(&strategy, &TrackingSlot::new(), &marker, &x);
        let pending = add(&strategy, &TrackingSlot::new(), &marker, &x);
        assert_eq!(marker.registration_count(), 2);

        failed.dispose();
        strategy.forget(&failed, &marker);
        assert_eq!(marker.registration_count(), 1);
        assert_eq!(strategy.pending_count(), 1);

        drop(marker);
        assert_eq!(strategy.queued_reclaims(), 1);
        strategy.force_cleanup_now();
        assert!(pending.is_disposed());
    }

    #[test]
    fn reclaim_leaves_newer_record_in_slot() {
        let strategy = FinalizationCleanup::new();
        let x = Observable::new(0);
        let slot = TrackingSlot::new();
        let old_marker = RetainedMarker::new();
        let old = add(&strategy, &slot, &old_marker, &x);
        let new_marker = RetainedMarker::new();
        let new = add(&strategy, &slot, &new_marker, &x);

        drop(old_marker);
        strategy.poll();
        assert!(old.is_disposed());
        assert!(!new.is_disposed());
        assert!(slot.get().is_some_and(|held| Rc::ptr_eq(&held, &new)));
    }
}
