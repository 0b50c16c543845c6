#![forbid(unsafe_code)]

//! Named tracking scopes.
//!
//! A [`Reaction`] does not re-run anything by itself. [`Reaction::track`]
//! records what a function reads; when any of that changes later, the
//! reaction's invalidate callback fires once. Deciding what to do about it
//! (typically: schedule another `track`) is the owner's business.
//!
//! # Failure Modes
//!
//! - **Panicking tracked function**: the tracking frame is popped during
//!   unwinding and the previous dependency set is kept unchanged.
//! - **Never disposed**: the reaction stays subscribed, and alive, for as long
//!   as the observables it read are alive.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::atom::{Atom, Derivation, DerivationId};
use super::tracking::{self, FrameKind, TrackingFrame};

struct ReactionInner {
    id: DerivationId,
    name: String,
    on_invalidate: Box<dyn Fn()>,
    deps: RefCell<Vec<Rc<Atom>>>,
    stale: Cell<bool>,
    disposed: Cell<bool>,
    self_weak: Weak<ReactionInner>,
}

impl Derivation for ReactionInner {
    fn id(&self) -> DerivationId {
        self.id
    }

    fn on_became_stale(&self) {
        if self.disposed.get() || self.stale.get() {
            return;
        }
        self.stale.set(true);
        if tracking::in_batch() {
            let weak: Weak<dyn Derivation> = self.self_weak.clone();
            tracking::defer(weak);
        } else {
            (self.on_invalidate)();
        }
    }

    fn run_deferred(&self) {
        if !self.disposed.get() && self.stale.get() {
            (self.on_invalidate)();
        }
    }
}

impl ReactionInner {
    fn unbind_all(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for atom in deps {
            atom.remove_observer(self.id);
        }
    }
}

/// A named dependency-tracking scope.
///
/// Cloning a `Reaction` creates another handle to the same scope.
#[derive(Clone)]
pub struct Reaction {
    inner: Rc<ReactionInner>,
}

impl Reaction {
    /// Create a reaction that calls `on_invalidate` when anything read during
    /// its last [`track`](Self::track) changes.
    #[must_use]
    pub fn new(name: impl Into<String>, on_invalidate: impl Fn() + 'static) -> Self {
        let inner = Rc::new_cyclic(|self_weak| ReactionInner {
            id: DerivationId::next(),
            name: name.into(),
            on_invalidate: Box::new(on_invalidate),
            deps: RefCell::new(Vec::new()),
            stale: Cell::new(false),
            disposed: Cell::new(false),
            self_weak: self_weak.clone(),
        });
        Self { inner }
    }

    /// Run `f`, recording its reads as this reaction's dependency set.
    ///
    /// The new set replaces the old one only after `f` returns. Writes made
    /// by `f` itself are therefore seen by the *previous* set. On a disposed
    /// reaction `f` still runs, untracked.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.inner.disposed.get() {
            return tracking::untracked(f);
        }
        self.inner.stale.set(false);

        let frame = TrackingFrame::enter(FrameKind::Tracking);
        let result = f();
        let next = frame.finish();

        if self.inner.disposed.get() {
            // Disposed from inside `f`; keep nothing.
            return result;
        }

        let owner: Rc<dyn Derivation> = self.inner.clone();
        let previous = self.inner.deps.replace(Vec::new());
        tracking::rebind(&owner, &previous, &next);
        *self.inner.deps.borrow_mut() = next;
        result
    }

    /// Unsubscribe from everything. Idempotent; the callback never fires
    /// afterwards.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        trace!(reaction = %self.inner.name, "reaction disposed");
        self.inner.unbind_all();
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether a dependency changed since the last `track`.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.inner.stale.get()
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Names of the current dependencies, in first-read order.
    #[must_use]
    pub fn dependency_names(&self) -> Vec<String> {
        self.inner
            .deps
            .borrow()
            .iter()
            .map(|atom| atom.name().to_string())
            .collect()
    }

    /// Number of current dependencies.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    /// Whether two handles refer to the same reaction.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.inner.name)
            .field("dependencies", &self.dependency_names())
            .field("stale", &self.inner.stale.get())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Observable, batch};

    fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);
        (count, move || count_clone.set(count_clone.get() + 1))
    }

    #[test]
    fn fires_once_until_retracked() {
        let x = Observable::new(0);
        let (fired, cb) = counter();
        let reaction = Reaction::new("r", cb);

        reaction.track(|| x.get());
        x.set(1);
        x.set(2);
        assert_eq!(fired.get(), 1);
        assert!(reaction.is_stale());

        reaction.track(|| x.get());
        assert!(!reaction.is_stale());
        x.set(3);
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn retrack_drops_unread_dependencies() {
        let a = Observable::named("a", 0);
        let b = Observable::named("b", 0);
        let (fired, cb) = counter();
        let reaction = Reaction::new("r", cb);

        reaction.track(|| a.get() + b.get());
        assert_eq!(reaction.dependency_count(), 2);

        reaction.track(|| b.get());
        assert_eq!(reaction.dependency_names(), vec!["b".to_string()]);
        assert!(!a.is_observed());

        a.set(1);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn write_during_track_reaches_previous_set_only() {
        let x = Observable::new(0);
        let (fired, cb) = counter();
        let reaction = Reaction::new("r", cb);

        // First run: x is not bound yet while the function executes.
        reaction.track(|| {
            let v = x.get();
            x.set(v + 1);
        });
        assert_eq!(fired.get(), 0);

        // Second run: the previous set contains x, so the write self-invalidates.
        reaction.track(|| {
            let v = x.get();
            x.set(v + 1);
        });
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn dispose_unsubscribes_and_is_idempotent() {
        let x = Observable::new(0);
        let (fired, cb) = counter();
        let reaction = Reaction::new("r", cb);
        reaction.track(|| x.get());
        assert!(x.is_observed());

        reaction.dispose();
        reaction.dispose();
        assert!(reaction.is_disposed());
        assert!(!x.is_observed());

        x.set(5);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn track_after_dispose_runs_untracked() {
        let x = Observable::new(7);
        let (_, cb) = counter();
        let reaction = Reaction::new("r", cb);
        reaction.dispose();
        assert_eq!(reaction.track(|| x.get()), 7);
        assert!(!x.is_observed());
    }

    #[test]
    fn panic_keeps_previous_dependencies() {
        let x = Observable::named("x", 0);
        let y = Observable::named("y", 0);
        let (_, cb) = counter();
        let reaction = Reaction::new("r", cb);
        reaction.track(|| x.get());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            reaction.track(|| {
                let v = y.get();
                assert!(v < 0, "render failed");
                v
            })
        }));
        assert!(result.is_err());
        assert_eq!(reaction.dependency_names(), vec!["x".to_string()]);
        assert!(!y.is_observed());
    }

    #[test]
    fn batch_defers_callback_to_outermost_end() {
        let x = Observable::new(0);
        let y = Observable::new(0);
        let (fired, cb) = counter();
        let reaction = Reaction::new("r", cb);
        reaction.track(|| x.get() + y.get());

        batch(|| {
            x.set(1);
            batch(|| y.set(1));
            assert_eq!(fired.get(), 0);
        });
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn disposed_inside_batch_never_fires() {
        let x = Observable::new(0);
        let (fired, cb) = counter();
        let reaction = Reaction::new("r", cb);
        reaction.track(|| x.get());

        batch(|| {
            x.set(1);
            reaction.dispose();
        });
        assert_eq!(fired.get(), 0);
    }
}
