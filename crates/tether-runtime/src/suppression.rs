#![forbid(unsafe_code)]

//! Thread-wide suppression of re-render requests.
//!
//! While at least one [`SuppressionGuard`] is alive, reaction callbacks do not
//! ask the host for an update. The counter nests, and the guard decrements it
//! on every exit path, unwinding included.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static SUPPRESSION_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Keeps updates suppressed until dropped.
#[must_use = "updates are only suppressed while the guard is alive"]
pub struct SuppressionGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        SUPPRESSION_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl std::fmt::Debug for SuppressionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuppressionGuard")
            .field("depth", &suppression_depth())
            .finish()
    }
}

/// Suppress update requests until the returned guard is dropped.
pub fn suppress_updates() -> SuppressionGuard {
    SUPPRESSION_DEPTH.with(|depth| depth.set(depth.get() + 1));
    SuppressionGuard {
        _not_send: PhantomData,
    }
}

/// Run `f` with update requests suppressed.
pub fn with_suppressed_updates<R>(f: impl FnOnce() -> R) -> R {
    let _guard = suppress_updates();
    f()
}

/// Whether update requests are currently suppressed on this thread.
#[must_use]
pub fn updates_suppressed() -> bool {
    suppression_depth() > 0
}

/// Current nesting depth.
#[must_use]
pub fn suppression_depth() -> u32 {
    SUPPRESSION_DEPTH.with(Cell::get)
}
