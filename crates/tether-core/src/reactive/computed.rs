#![forbid(unsafe_code)]

//! Memoized derivations with automatic dependency tracking.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function, its cached result, and an atom of
//! its own. The compute function runs in a tracking frame, so whatever it
//! reads becomes its dependency set. A change in any dependency marks the
//! cache dirty and is forwarded to the computed's own observers.
//!
//! # Invariants
//!
//! 1. `get()` never returns a value older than the last completed dependency
//!    mutation.
//! 2. While observed, the compute function runs at most once per dependency
//!    change cycle.
//! 3. When the last observer unsubscribes the computed suspends: it drops its
//!    dependency subscriptions and recomputes on the next read.
//! 4. A read that is neither tracked nor backed by an observer computes a
//!    fresh value and caches nothing.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: the previous cache is kept and the dirty
//!   flag stays set, so the next `get()` retries.
//! - **Cycle**: a compute function that reads its own computed panics.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::atom::{Atom, Derivation, DerivationId, next_node_id};
use super::observable::Observable;
use super::tracking::{self, FrameKind, TrackingFrame};

struct ComputedInner<T> {
    id: DerivationId,
    atom: Rc<Atom>,
    compute: Box<dyn Fn() -> T>,
    cached: RefCell<Option<T>>,
    dirty: Cell<bool>,
    computing: Cell<bool>,
    version: Cell<u64>,
    deps: RefCell<Vec<Rc<Atom>>>,
    self_weak: Weak<ComputedInner<T>>,
}

impl<T: 'static> Derivation for ComputedInner<T> {
    fn id(&self) -> DerivationId {
        self.id
    }

    fn on_became_stale(&self) {
        if self.dirty.replace(true) {
            return;
        }
        self.atom.report_changed();
    }
}

/// Clears the `computing` flag on every exit path.
struct ComputingGuard<'a>(&'a Cell<bool>);

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn refresh(&self) -> T {
        if !self.dirty.get() {
            if let Some(value) = self.cached.borrow().as_ref() {
                return value.clone();
            }
        }
        assert!(
            !self.computing.get(),
            "cycle detected in computed `{}`",
            self.atom.name()
        );
        self.computing.set(true);
        let _computing = ComputingGuard(&self.computing);

        let frame = TrackingFrame::enter(FrameKind::Tracking);
        let value = (self.compute)();
        let next = frame.finish();

        if let Some(owner) = self.self_weak.upgrade() {
            let owner: Rc<dyn Derivation> = owner;
            let previous = self.deps.replace(Vec::new());
            tracking::rebind(&owner, &previous, &next);
            *self.deps.borrow_mut() = next;
        }

        *self.cached.borrow_mut() = Some(value.clone());
        self.dirty.set(false);
        self.version.set(self.version.get() + 1);
        value
    }

    fn suspend(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for atom in deps {
            atom.remove_observer(self.id);
        }
        self.dirty.set(true);
    }
}

/// A lazily-evaluated, memoized value derived from whatever its compute
/// function reads.
///
/// Cloning a `Computed` creates a new handle to the **same** state.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("name", &self.inner.atom.name())
            .field("cached", &self.inner.cached.borrow())
            .field("dirty", &self.inner.dirty.get())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed value with a generated name.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::named(format!("Computed@{}", next_node_id()), compute)
    }

    /// Create a computed value with a diagnostic name.
    pub fn named(name: impl Into<String>, compute: impl Fn() -> T + 'static) -> Self {
        let inner = Rc::new_cyclic(|self_weak: &Weak<ComputedInner<T>>| ComputedInner {
            id: DerivationId::next(),
            atom: Atom::new(name.into()),
            compute: Box::new(compute),
            cached: RefCell::new(None),
            dirty: Cell::new(true),
            computing: Cell::new(false),
            version: Cell::new(0),
            deps: RefCell::new(Vec::new()),
            self_weak: self_weak.clone(),
        });

        let weak = Rc::downgrade(&inner);
        inner.atom.set_on_unobserved(Box::new(move || {
            if let Some(strong) = weak.upgrade() {
                strong.suspend();
            }
        }));

        Self { inner }
    }

    /// Create a computed value mapped from a single observable.
    pub fn from_observable<S: Clone + PartialEq + 'static>(
        source: &Observable<S>,
        map: impl Fn(&S) -> T + 'static,
    ) -> Self {
        let source = source.clone();
        Self::new(move || source.with(&map))
    }

    /// Get the current value, recomputing if a dependency has changed.
    #[must_use]
    pub fn get(&self) -> T {
        let inner = &self.inner;
        if !tracking::is_tracking() && inner.atom.observer_count() == 0 {
            return tracking::untracked(|| (inner.compute)());
        }
        inner.atom.report_observed();
        inner.refresh()
    }

    /// Whether the cached value is stale (or absent).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Number of recomputations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Number of derivations currently observing this computed.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }

    /// Number of atoms this computed is subscribed to.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }
}
