#![forbid(unsafe_code)]

//! Static rendering toggle.
//!
//! With static rendering enabled, observers render once without tracking
//! anything: no reaction is created and nothing is registered for cleanup.
//! Used for one-shot output such as server-side or snapshot rendering.

use std::cell::Cell;

thread_local! {
    static STATIC_RENDERING: Cell<bool> = const { Cell::new(false) };
}

pub fn enable_static_rendering(enable: bool) {
    STATIC_RENDERING.with(|flag| flag.set(enable));
}

#[must_use]
pub fn is_static_rendering() -> bool {
    STATIC_RENDERING.with(Cell::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle() {
        assert!(!is_static_rendering());
        enable_static_rendering(true);
        assert!(is_static_rendering());
        enable_static_rendering(false);
        assert!(!is_static_rendering());
    }
}
