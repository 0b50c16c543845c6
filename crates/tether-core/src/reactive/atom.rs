#![forbid(unsafe_code)]

//! Graph nodes: atoms (things that can be read) and derivations (things that
//! read them).

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::tracking;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AtomId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DerivationId(u64);

impl DerivationId {
    pub(crate) fn next() -> Self {
        Self(next_node_id())
    }
}

/// Anything that subscribes to atoms.
pub(crate) trait Derivation {
    fn id(&self) -> DerivationId;

    /// One of the atoms this derivation depends on changed.
    fn on_became_stale(&self);

    /// Deliver a notification that was held back by an open batch.
    fn run_deferred(&self) {}
}

/// A readable node with a set of observers.
pub(crate) struct Atom {
    id: AtomId,
    name: String,
    observers: RefCell<Vec<Rc<dyn Derivation>>>,
    on_unobserved: RefCell<Option<Box<dyn Fn()>>>,
}

impl Atom {
    pub(crate) fn new(name: String) -> Rc<Self> {
        Rc::new(Self {
            id: AtomId(next_node_id()),
            name,
            observers: RefCell::new(Vec::new()),
            on_unobserved: RefCell::new(None),
        })
    }

    pub(crate) fn id(&self) -> AtomId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Install the hook run when the last observer unsubscribes.
    pub(crate) fn set_on_unobserved(&self, hook: Box<dyn Fn()>) {
        *self.on_unobserved.borrow_mut() = Some(hook);
    }

    pub(crate) fn report_observed(self: &Rc<Self>) {
        tracking::report_observed(self);
    }

    /// Notify every current observer. The observer list is snapshotted first,
    /// so observers may subscribe or unsubscribe from inside the callback.
    pub(crate) fn report_changed(&self) {
        let observers: Vec<Rc<dyn Derivation>> = self.observers.borrow().clone();
        for observer in observers {
            observer.on_became_stale();
        }
    }

    pub(crate) fn add_observer(&self, observer: Rc<dyn Derivation>) {
        let mut observers = self.observers.borrow_mut();
        let id = observer.id();
        if !observers.iter().any(|o| o.id() == id) {
            observers.push(observer);
        }
    }

    pub(crate) fn remove_observer(&self, id: DerivationId) {
        let became_unobserved = {
            let mut observers = self.observers.borrow_mut();
            let before = observers.len();
            observers.retain(|o| o.id() != id);
            before != observers.len() && observers.is_empty()
        };
        if became_unobserved {
            if let Some(hook) = self.on_unobserved.borrow().as_ref() {
                hook();
            }
        }
    }

    /// Run the unobserved hook if nobody observes this atom. Used when a
    /// tracking frame is abandoned and its reads will never be bound.
    pub(crate) fn release_if_unobserved(&self) {
        if self.observers.borrow().is_empty()
            && let Some(hook) = self.on_unobserved.borrow().as_ref()
        {
            hook();
        }
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("name", &self.name)
            .field("observers", &self.observer_count())
            .finish()
    }
}
