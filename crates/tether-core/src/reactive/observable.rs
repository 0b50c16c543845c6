#![forbid(unsafe_code)]

//! Observable value wrapper with dependency tracking and version counting.
//!
//! # Design
//!
//! [`Observable<T>`] wraps a value of type `T` in shared, reference-counted
//! storage next to an atom in the reactive graph. Reading through
//! [`get`](Observable::get) or [`with`](Observable::with) inside a tracking
//! scope registers the scope as a dependent. When the value changes
//! (determined by `PartialEq`), every dependent is notified.
//!
//! # Failure Modes
//!
//! - **Re-entrant update**: calling `set()` from inside an
//!   [`update`](Observable::update) closure on the same observable panics
//!   (RefCell borrow rules).
//! - **Observer leak**: a reaction that is never disposed keeps itself
//!   subscribed. [`observer_count`](Observable::observer_count) exposes the
//!   live count so leak tests can assert on it.

use std::cell::RefCell;
use std::rc::Rc;

use super::atom::{Atom, next_node_id};

struct ObservableInner<T> {
    value: T,
    version: u64,
}

/// A shared, version-tracked value whose reads are tracked.
///
/// Cloning an `Observable` creates a new handle to the **same** state.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each value-changing mutation.
/// 2. `set(v)` where `v == current` is a no-op.
/// 3. Dependents are notified synchronously, after the new value is stored.
pub struct Observable<T> {
    atom: Rc<Atom>,
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            atom: Rc::clone(&self.atom),
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("name", &self.atom.name())
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("observer_count", &self.atom.observer_count())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable with a generated name.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::named(format!("Observable@{}", next_node_id()), value)
    }

    /// Create an observable with a diagnostic name. The name shows up in
    /// [`Reaction::dependency_names`](super::Reaction::dependency_names).
    #[must_use]
    pub fn named(name: impl Into<String>, value: T) -> Self {
        Self {
            atom: Atom::new(name.into()),
            inner: Rc::new(RefCell::new(ObservableInner { value, version: 0 })),
        }
    }

    /// Get a clone of the current value, registering a dependency.
    #[must_use]
    pub fn get(&self) -> T {
        self.atom.report_observed();
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference, registering a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.atom.report_observed();
        f(&self.inner.borrow().value)
    }

    /// Set a new value. If it differs from the current value the version is
    /// bumped and dependents are notified.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.atom.report_changed();
    }

    /// Modify the value in place. Dependents are notified only if the value
    /// actually changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let old = inner.value.clone();
            f(&mut inner.value);
            if inner.value != old {
                inner.version += 1;
                true
            } else {
                false
            }
        };
        if changed {
            self.atom.report_changed();
        }
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.atom.name()
    }

    /// Number of derivations currently subscribed.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.atom.observer_count()
    }

    /// Whether any derivation is currently subscribed.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.observer_count() > 0
    }
}
