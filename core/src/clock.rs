//! Time sources for window bucketing and retry deadlines
//!
//! - `MonotonicClock`: milliseconds since the clock was created, anchored on
//!   `Instant` so NTP adjustments can never move time backwards
//! - `ManualClock`: a settable clock for tests and simulations

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Source of "now" in milliseconds
pub trait Clock: Send + Sync + Debug {
    /// Current time in milliseconds. Must never decrease between calls.
    fn now_ms(&self) -> i64;
}

/// Monotonic clock relative to its own creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }
}

/// Clock that only moves when told to
///
/// # Example
///
/// ```rust
/// use guard_machines::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(250);
/// assert_eq!(clock.now_ms(), 1_250);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Move time forward by `ms`
    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }

    /// Jump to an absolute time. Callers are responsible for not going backwards.
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}
