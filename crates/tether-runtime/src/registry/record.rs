#![forbid(unsafe_code)]

//! Tracking records, the slots that own them, and the marker whose drop
//! signals an abandoned render.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use web_time::Instant;

use crate::round_robin::RoundRobinReaction;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one component instance's tracking slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    fn next() -> Self {
        Self(NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Opaque handle linking a [`RetainedMarker`] registration to a pending
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupToken(pub(crate) u64);

impl CleanupToken {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// The tracking reaction of one render attempt plus its mount bookkeeping.
pub struct TrackingRecord {
    slot: SlotId,
    reaction: RoundRobinReaction,
    mounted: Cell<bool>,
    changed_before_mount: Cell<bool>,
    cleanup_at: Cell<Option<Instant>>,
    cleanup_token: Cell<Option<CleanupToken>>,
    disposed: Cell<bool>,
}

impl TrackingRecord {
    /// A record for a render that has not been committed yet.
    #[must_use]
    pub fn new(slot: SlotId, reaction: RoundRobinReaction) -> Self {
        Self {
            slot,
            reaction,
            mounted: Cell::new(false),
            changed_before_mount: Cell::new(false),
            cleanup_at: Cell::new(None),
            cleanup_token: Cell::new(None),
            disposed: Cell::new(false),
        }
    }

    /// A record for an instance that is already mounted. It is never
    /// registered for cleanup.
    #[must_use]
    pub fn new_mounted(slot: SlotId, reaction: RoundRobinReaction) -> Self {
        let record = Self::new(slot, reaction);
        record.mounted.set(true);
        record
    }

    #[must_use]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    #[must_use]
    pub fn reaction(&self) -> &RoundRobinReaction {
        &self.reaction
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.get()
    }

    pub(crate) fn set_mounted(&self) {
        self.mounted.set(true);
    }

    #[must_use]
    pub fn changed_before_mount(&self) -> bool {
        self.changed_before_mount.get()
    }

    pub(crate) fn mark_changed_before_mount(&self) {
        self.changed_before_mount.set(true);
    }

    /// Clear the flag, returning whether it was set.
    pub(crate) fn take_changed_before_mount(&self) -> bool {
        self.changed_before_mount.replace(false)
    }

    /// When the timer scan may dispose this record; `None` means never.
    #[must_use]
    pub fn cleanup_at(&self) -> Option<Instant> {
        self.cleanup_at.get()
    }

    pub(crate) fn set_cleanup_at(&self, at: Option<Instant>) {
        self.cleanup_at.set(at);
    }

    #[must_use]
    pub fn cleanup_token(&self) -> Option<CleanupToken> {
        self.cleanup_token.get()
    }

    pub(crate) fn set_cleanup_token(&self, token: Option<CleanupToken>) {
        self.cleanup_token.set(token);
    }

    /// Dispose the reaction. Returns `false` if the record was already
    /// disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.replace(true) {
            return false;
        }
        self.cleanup_at.set(None);
        self.reaction.dispose();
        true
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}

impl std::fmt::Debug for TrackingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingRecord")
            .field("slot", &self.slot)
            .field("reaction", &self.reaction.name())
            .field("mounted", &self.mounted.get())
            .field("changed_before_mount", &self.changed_before_mount.get())
            .field("cleanup_at", &self.cleanup_at.get())
            .field("cleanup_token", &self.cleanup_token.get())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

/// Where a component instance keeps its current tracking record.
#[derive(Debug)]
pub struct TrackingSlot {
    id: SlotId,
    current: RefCell<Option<Rc<TrackingRecord>>>,
}

impl TrackingSlot {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: SlotId::next(),
            current: RefCell::new(None),
        })
    }

    #[must_use]
    pub fn id(&self) -> SlotId {
        self.id
    }

    #[must_use]
    pub fn get(&self) -> Option<Rc<TrackingRecord>> {
        self.current.borrow().clone()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.borrow().is_none()
    }

    pub fn set(&self, record: Rc<TrackingRecord>) {
        *self.current.borrow_mut() = Some(record);
    }

    pub fn take(&self) -> Option<Rc<TrackingRecord>> {
        self.current.borrow_mut().take()
    }

    /// Empty the slot only if it still holds `record`.
    pub fn clear_if(&self, record: &Rc<TrackingRecord>) -> bool {
        let mut current = self.current.borrow_mut();
        if current.as_ref().is_some_and(|held| Rc::ptr_eq(held, record)) {
            *current = None;
            true
        } else {
            false
        }
    }
}

/// Tokens waiting to be reclaimed, filled by dropped markers.
#[derive(Debug, Default)]
pub(crate) struct ReclaimQueue {
    tokens: RefCell<Vec<CleanupToken>>,
}

impl ReclaimQueue {
    pub(crate) fn push(&self, token: CleanupToken) {
        self.tokens.borrow_mut().push(token);
    }

    pub(crate) fn drain(&self) -> Vec<CleanupToken> {
        std::mem::take(&mut *self.tokens.borrow_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.borrow().len()
    }
}

/// An object the host keeps alive for exactly as long as it keeps the
/// component instance. Dropping it without a commit marks every record
/// registered against it as abandoned.
#[derive(Default)]
pub struct RetainedMarker {
    registrations: RefCell<Vec<(CleanupToken, Weak<ReclaimQueue>)>>,
}

impl RetainedMarker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, token: CleanupToken, queue: Weak<ReclaimQueue>) {
        self.registrations.borrow_mut().push((token, queue));
    }

    pub(crate) fn unregister(&self, token: CleanupToken) {
        self.registrations.borrow_mut().retain(|(t, _)| *t != token);
    }

    /// Number of live registrations.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.registrations.borrow().len()
    }
}

impl Drop for RetainedMarker {
    fn drop(&mut self) {
        for (token, queue) in self.registrations.get_mut().drain(..) {
            if let Some(queue) = queue.upgrade() {
                queue.push(token);
            }
        }
    }
}

impl std::fmt::Debug for RetainedMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetainedMarker")
            .field("registrations", &self.registration_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(slot: &TrackingSlot) -> Rc<TrackingRecord> {
        Rc::new(TrackingRecord::new(
            slot.id(),
            RoundRobinReaction::new("observer(Test)", || {}),
        ))
    }

    #[test]
    fn dispose_happens_once() {
        let slot = TrackingSlot::new();
        let rec = record(&slot);
        assert!(rec.dispose());
        assert!(!rec.dispose());
        assert!(rec.is_disposed());
    }

    #[test]
    fn clear_if_checks_identity() {
        let slot = TrackingSlot::new();
        let first = record(&slot);
        let second = record(&slot);
        slot.set(Rc::clone(&second));

        assert!(!slot.clear_if(&first));
        assert!(!slot.is_empty());
        assert!(slot.clear_if(&second));
        assert!(slot.is_empty());
    }

    #[test]
    fn marker_drop_queues_registered_tokens() {
        let queue = Rc::new(ReclaimQueue::default());
        let marker = RetainedMarker::new();
        marker.register(CleanupToken(1), Rc::downgrade(&queue));
        marker.register(CleanupToken(2), Rc::downgrade(&queue));
        marker.unregister(CleanupToken(1));
        drop(marker);
        assert_eq!(queue.drain(), vec![CleanupToken(2)]);
    }

    #[test]
    fn changed_before_mount_is_consumed() {
        let slot = TrackingSlot::new();
        let rec = record(&slot);
        rec.mark_changed_before_mount();
        assert!(rec.take_changed_before_mount());
        assert!(!rec.take_changed_before_mount());
    }

    #[test]
    fn slot_ids_are_unique() {
        assert_ne!(TrackingSlot::new().id(), TrackingSlot::new().id());
    }
}
