#![forbid(unsafe_code)]

//! Tracking frames and batching.
//!
//! The frame stack is thread-local. Every derivation run pushes a frame,
//! reads append to the innermost frame, and the frame is popped either by
//! [`TrackingFrame::finish`] (normal return) or by its `Drop` (unwinding).

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use super::atom::{Atom, AtomId, Derivation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// Reads are recorded as dependencies.
    Tracking,
    /// Reads are ignored, shadowing any outer tracking frame.
    Untracked,
}

struct Frame {
    kind: FrameKind,
    deps: Vec<Rc<Atom>>,
    seen: AHashSet<AtomId>,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static BATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
    static PENDING: RefCell<Vec<Weak<dyn Derivation>>> = const { RefCell::new(Vec::new()) };
}

/// RAII handle for one pushed frame.
pub(crate) struct TrackingFrame {
    finished: bool,
}

impl TrackingFrame {
    pub(crate) fn enter(kind: FrameKind) -> Self {
        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame {
                kind,
                deps: Vec::new(),
                seen: AHashSet::new(),
            });
        });
        Self { finished: false }
    }

    /// Pop the frame and return the atoms read while it was innermost,
    /// in first-read order.
    pub(crate) fn finish(mut self) -> Vec<Rc<Atom>> {
        self.finished = true;
        FRAMES
            .with(|frames| frames.borrow_mut().pop())
            .map(|frame| frame.deps)
            .unwrap_or_default()
    }
}

impl Drop for TrackingFrame {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let abandoned = FRAMES
            .with(|frames| frames.borrow_mut().pop())
            .map(|frame| frame.deps)
            .unwrap_or_default();
        for atom in abandoned {
            atom.release_if_unobserved();
        }
    }
}

/// Record a read of `atom` in the innermost frame, if it is tracking.
pub(crate) fn report_observed(atom: &Rc<Atom>) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let Some(top) = frames.last_mut() else {
            return;
        };
        if top.kind == FrameKind::Tracking && top.seen.insert(atom.id()) {
            top.deps.push(Rc::clone(atom));
        }
    });
}

/// Whether a read right now would be recorded as a dependency.
#[must_use]
pub fn is_tracking() -> bool {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .last()
            .is_some_and(|frame| frame.kind == FrameKind::Tracking)
    })
}

/// Run `f` without recording any reads, even inside a tracking scope.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _frame = TrackingFrame::enter(FrameKind::Untracked);
    f()
}

/// Replace `owner`'s subscriptions `previous` with `next`.
///
/// New subscriptions are added before stale ones are removed so an atom read
/// in both runs never transiently loses its last observer.
pub(crate) fn rebind(owner: &Rc<dyn Derivation>, previous: &[Rc<Atom>], next: &[Rc<Atom>]) {
    let previous_ids: AHashSet<AtomId> = previous.iter().map(|a| a.id()).collect();
    let next_ids: AHashSet<AtomId> = next.iter().map(|a| a.id()).collect();

    for atom in next {
        if !previous_ids.contains(&atom.id()) {
            atom.add_observer(Rc::clone(owner));
        }
    }
    for atom in previous {
        if !next_ids.contains(&atom.id()) {
            atom.remove_observer(owner.id());
        }
    }
}

// ─── Batching ────────────────────────────────────────────────────────────────

/// Whether a [`batch`] is currently open on this thread.
#[must_use]
pub fn in_batch() -> bool {
    BATCH_DEPTH.with(|depth| depth.get() > 0)
}

/// Queue a stale derivation until the outermost batch closes.
pub(crate) fn defer(derivation: Weak<dyn Derivation>) {
    PENDING.with(|pending| pending.borrow_mut().push(derivation));
}

struct BatchGuard;

impl BatchGuard {
    fn enter() -> Self {
        BATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let depth = BATCH_DEPTH.with(|depth| {
            let next = depth.get().saturating_sub(1);
            depth.set(next);
            next
        });
        if depth > 0 {
            return;
        }
        if std::thread::panicking() {
            PENDING.with(|pending| pending.borrow_mut().clear());
            return;
        }
        loop {
            let ready = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
            if ready.is_empty() {
                break;
            }
            for derivation in ready.iter().filter_map(Weak::upgrade) {
                derivation.run_deferred();
            }
        }
    }
}

/// Run `f` with reaction callbacks deferred until the outermost batch ends.
///
/// Computeds are still marked dirty immediately; only reaction callbacks
/// wait. Each stale reaction fires once when the batch closes.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _guard = BatchGuard::enter();
    f()
}
