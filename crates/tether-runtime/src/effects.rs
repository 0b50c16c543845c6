#![forbid(unsafe_code)]

//! Per-instance effect disposers.

use std::cell::RefCell;

/// Tears down one effect (a reaction, a subscription, a timer...).
pub type Disposer = Box<dyn FnOnce()>;

/// A set of disposers run together, at most once.
pub struct InstanceEffects {
    disposers: RefCell<Option<Vec<Disposer>>>,
}

impl Default for InstanceEffects {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InstanceEffects {
    #[must_use]
    pub fn new(disposers: Vec<Disposer>) -> Self {
        Self {
            disposers: RefCell::new(Some(disposers)),
        }
    }

    /// Run every disposer in registration order. Later calls do nothing.
    pub fn dispose(&self) {
        let disposers = self.disposers.borrow_mut().take();
        for disposer in disposers.into_iter().flatten() {
            disposer();
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposers.borrow().is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.disposers.borrow().as_ref().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InstanceEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceEffects")
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn disposers_run_once_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&log), Rc::clone(&log));
        let effects = InstanceEffects::new(vec![
            Box::new(move || a.borrow_mut().push("a")),
            Box::new(move || b.borrow_mut().push("b")),
        ]);
        assert_eq!(effects.len(), 2);

        effects.dispose();
        effects.dispose();
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert!(effects.is_disposed());
        assert!(effects.is_empty());
    }

    #[test]
    fn disposer_may_touch_its_own_set() {
        let effects = Rc::new(InstanceEffects::default());
        let seen = Rc::new(Cell::new(false));
        let inner = Rc::clone(&effects);
        let seen_clone = Rc::clone(&seen);
        *effects.disposers.borrow_mut() = Some(vec![Box::new(move || {
            seen_clone.set(inner.is_disposed());
        })]);
        effects.dispose();
        assert!(seen.get());
    }
}
