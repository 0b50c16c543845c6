#![forbid(unsafe_code)]

//! Time sources for cleanup scheduling.
//!
//! Production code reads [`web_time::Instant::now()`]. Tests swap in a
//! [`LabClock`], which only moves when told to, so cleanup windows can be
//! crossed (or hit exactly) without sleeping.
//!
//! # Example
//!
//! ```
//! use tether_core::clock::{Clock, LabClock};
//! use web_time::Duration;
//!
//! let lab = LabClock::new();
//! let clock = Clock::lab(&lab);
//! let t0 = clock.now();
//! lab.advance(Duration::from_millis(250));
//! assert_eq!(clock.now().duration_since(t0), Duration::from_millis(250));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, Instant};

/// Where "now" comes from.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    /// Real wall-clock time.
    #[default]
    Real,
    /// Deterministic lab clock for testing.
    Lab(LabClock),
}

impl Clock {
    /// The real clock.
    #[must_use]
    pub fn real() -> Self {
        Self::Real
    }

    /// A clock driven by `lab`. Clones of the same [`LabClock`] share time.
    #[must_use]
    pub fn lab(lab: &LabClock) -> Self {
        Self::Lab(lab.clone())
    }

    /// Current time according to this source.
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::Real => Instant::now(),
            Self::Lab(c) => c.now(),
        }
    }

    /// Whether this clock is a lab clock.
    #[inline]
    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self, Self::Lab(_))
    }
}

/// A manually-advanceable clock for deterministic tests.
///
/// All handles cloned from the same `LabClock` see the same time.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset_us: Arc<AtomicU64>,
}

impl LabClock {
    /// Create a new lab clock starting at `Instant::now()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the lab clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = delta.as_micros().min(u64::MAX as u128) as u64;
        self.offset_us.fetch_add(us, Ordering::Release);
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Instant {
        let offset = Duration::from_micros(self.offset_us.load(Ordering::Acquire));
        self.epoch + offset
    }

    /// Total time advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_us.load(Ordering::Acquire))
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_clock_advance_accumulates() {
        let clock = LabClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_millis(100));
        clock.advance(Duration::from_millis(200));
        assert_eq!(clock.now().duration_since(t0), Duration::from_millis(300));
        assert_eq!(clock.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn lab_clones_share_time() {
        let lab = LabClock::new();
        let a = Clock::lab(&lab);
        let b = Clock::lab(&lab.clone());
        lab.advance(Duration::from_secs(3));
        assert_eq!(a.now(), b.now());
    }

    #[test]
    fn real_clock_is_monotonic() {
        let clock = Clock::real();
        let t0 = clock.now();
        let t1 = clock.now();
        assert!(t1 >= t0);
        assert!(!clock.is_lab());
    }

    #[test]
    fn default_is_real() {
        assert!(matches!(Clock::default(), Clock::Real));
        assert!(Clock::lab(&LabClock::new()).is_lab());
    }
}
