#![forbid(unsafe_code)]

//! Two alternating tracking reactions behind one handle.
//!
//! # Design
//!
//! A single reaction that re-tracks itself would see writes performed by the
//! tracked function against its *previous* dependency set, and would
//! invalidate itself during its own render. [`RoundRobinReaction`] keeps two
//! slots instead. Each `track` swaps the current slot first, tracks into the
//! fresh slot, and then clears the old slot with an empty track. A slot's
//! callback only fires while it is the current slot, so the stale
//! subscriptions of the old slot can never request an update.
//!
//! # Invariants
//!
//! 1. After `track` returns, at most one slot holds dependencies.
//! 2. The slots are created on the first `track` and disposed together.
//! 3. `on_invalidate` never runs while the gate reports updates suppressed.

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::Rc;

use tether_core::Reaction;
use tracing::trace;

use crate::suppression::updates_suppressed;

/// Shown by [`RoundRobinReaction::debug_value`] before the first track.
pub const UNKNOWN_DEBUG_VALUE: &str = "<unknown>";

pub struct RoundRobinReaction {
    name: String,
    on_invalidate: Rc<dyn Fn()>,
    gate: Rc<dyn Fn() -> bool>,
    current: Rc<Cell<usize>>,
    slots: RefCell<Option<[Reaction; 2]>>,
}

impl RoundRobinReaction {
    /// Create the pair. Callbacks are gated on [`updates_suppressed`].
    #[must_use]
    pub fn new(name: impl Into<String>, on_invalidate: impl Fn() + 'static) -> Self {
        Self::with_gate(name, on_invalidate, || !updates_suppressed())
    }

    /// Create the pair with a custom "may request updates" gate.
    #[must_use]
    pub fn with_gate(
        name: impl Into<String>,
        on_invalidate: impl Fn() + 'static,
        gate: impl Fn() -> bool + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            on_invalidate: Rc::new(on_invalidate),
            gate: Rc::new(gate),
            current: Rc::new(Cell::new(1)),
            slots: RefCell::new(None),
        }
    }

    fn create_slots(&self) -> [Reaction; 2] {
        trace!(reaction = %self.name, "creating round-robin slots");
        [0usize, 1].map(|index| {
            let current = Rc::clone(&self.current);
            let gate = Rc::clone(&self.gate);
            let on_invalidate = Rc::clone(&self.on_invalidate);
            let name = self.name.clone();
            Reaction::new(self.name.clone(), move || {
                if current.get() != index {
                    return;
                }
                if gate() {
                    on_invalidate();
                } else {
                    trace!(reaction = %name, slot = index, "invalidation suppressed");
                }
            })
        })
    }

    fn slots(&self) -> [Reaction; 2] {
        self.slots
            .borrow_mut()
            .get_or_insert_with(|| self.create_slots())
            .clone()
    }

    /// Track `f` in the other slot, then clear the slot that was current.
    ///
    /// A panic in `f` still clears the old slot before it is resumed.
    pub fn track<T>(&self, f: impl FnOnce() -> T) -> T {
        let slots = self.slots();
        let old = self.current.get();
        let next = (old + 1) % 2;
        self.current.set(next);
        trace!(reaction = %self.name, from = old, to = next, "slot rotated");

        let result = catch_unwind(AssertUnwindSafe(|| slots[next].track(f)));
        slots[old].track(|| ());

        match result {
            Ok(value) => value,
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Dispose both slots. Idempotent.
    pub fn dispose(&self) {
        let Some(slots) = self.slots.borrow_mut().take() else {
            return;
        };
        for slot in &slots {
            slot.dispose();
        }
    }

    /// The slot that holds the live dependencies, once created.
    #[must_use]
    pub fn current_reaction(&self) -> Option<Reaction> {
        self.slots
            .borrow()
            .as_ref()
            .map(|slots| slots[self.current.get()].clone())
    }

    /// Index of the current slot.
    #[must_use]
    pub fn current_slot(&self) -> usize {
        self.current.get()
    }

    /// Dependency names of the current slot, comma separated.
    #[must_use]
    pub fn debug_value(&self) -> String {
        match self.current_reaction() {
            Some(reaction) => reaction.dependency_names().join(", "),
            None => UNKNOWN_DEBUG_VALUE.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the slots currently exist.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.slots.borrow().is_some()
    }

    /// Dependency counts of slot 0 and slot 1, for leak assertions.
    #[must_use]
    pub fn slot_dependency_counts(&self) -> [usize; 2] {
        match self.slots.borrow().as_ref() {
            Some(slots) => [slots[0].dependency_count(), slots[1].dependency_count()],
            None => [0, 0],
        }
    }
}

impl std::fmt::Debug for RoundRobinReaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinReaction")
            .field("name", &self.name)
            .field("current", &self.current.get())
            .field("created", &self.is_created())
            .field("debug_value", &self.debug_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suppression::with_suppressed_updates;
    use tether_core::Observable;

    fn counting(name: &str) -> (RoundRobinReaction, Rc<Cell<u32>>) {
        let fired = Rc::new(Cell::new(0u32));
        let fired_clone = Rc::clone(&fired);
        let rr = RoundRobinReaction::new(name, move || fired_clone.set(fired_clone.get() + 1));
        (rr, fired)
    }

    #[test]
    fn lazily_creates_slots() {
        let (rr, _) = counting("lazy");
        assert!(!rr.is_created());
        assert!(rr.current_reaction().is_none());
        assert_eq!(rr.debug_value(), UNKNOWN_DEBUG_VALUE);

        rr.track(|| ());
        assert!(rr.is_created());
        assert_eq!(rr.current_slot(), 0);
    }

    #[test]
    fn alternates_slots_and_clears_the_old_one() {
        let x = Observable::named("x", 1);
        let (rr, _) = counting("alt");

        rr.track(|| x.get());
        assert_eq!(rr.current_slot(), 0);
        assert_eq!(rr.slot_dependency_counts(), [1, 0]);

        rr.track(|| x.get());
        assert_eq!(rr.current_slot(), 1);
        assert_eq!(rr.slot_dependency_counts(), [0, 1]);
        assert_eq!(x.observer_count(), 1);
    }

    #[test]
    fn self_write_does_not_invalidate() {
        let x = Observable::named("x", 0);
        let (rr, fired) = counting("self-write");
        rr.track(|| x.get());

        // The old slot still observes x while the new one runs; it must not fire.
        rr.track(|| {
            let v = x.get();
            x.set(v + 1);
        });
        assert_eq!(fired.get(), 0);

        x.set(10);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn write_to_unread_observable_during_render_is_silent() {
        let x = Observable::named("x", 0);
        let y = Observable::named("y", 0);
        let (rr, fired) = counting("unread-write");

        rr.track(|| x.get());
        rr.track(|| {
            y.set(1);
            x.get()
        });
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn suppressed_updates_are_not_forwarded() {
        let x = Observable::new(0);
        let (rr, fired) = counting("suppressed");
        rr.track(|| x.get());

        with_suppressed_updates(|| x.set(1));
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn custom_gate() {
        let open = Rc::new(Cell::new(false));
        let open_clone = Rc::clone(&open);
        let fired = Rc::new(Cell::new(0u32));
        let fired_clone = Rc::clone(&fired);
        let rr = RoundRobinReaction::with_gate(
            "gated",
            move || fired_clone.set(fired_clone.get() + 1),
            move || open_clone.get(),
        );
        let x = Observable::new(0);

        rr.track(|| x.get());
        x.set(1);
        assert_eq!(fired.get(), 0);

        open.set(true);
        rr.track(|| x.get());
        x.set(2);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn panic_still_clears_old_slot() {
        let x = Observable::named("x", 0);
        let y = Observable::named("y", 0);
        let (rr, _) = counting("panics");
        rr.track(|| x.get());

        let result = catch_unwind(AssertUnwindSafe(|| {
            rr.track(|| {
                let v = y.get();
                assert!(v > 0, "render failed");
                v
            })
        }));
        assert!(result.is_err());
        assert!(!x.is_observed());
        assert!(!y.is_observed());
        assert_eq!(rr.slot_dependency_counts(), [0, 0]);
    }

    #[test]
    fn dispose_is_idempotent_and_unsubscribes() {
        let x = Observable::new(0);
        let (rr, fired) = counting("dispose");
        rr.track(|| x.get());

        rr.dispose();
        rr.dispose();
        assert!(!rr.is_created());
        assert!(!x.is_observed());
        x.set(1);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn debug_value_lists_dependencies() {
        let a = Observable::named("a", 0);
        let b = Observable::named("b", 0);
        let (rr, _) = counting("debug");
        rr.track(|| a.get() + b.get());
        assert_eq!(rr.debug_value(), "a, b");
    }
}
