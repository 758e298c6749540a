//! Clock abstraction — the cache's only source of time.
//!
//! Sliding expirations are measured against a monotonic clock, so the trait
//! deals in [`Instant`]s.  Production caches use [`SystemClock`]; tests
//! substitute a [`ManualClock`] and advance it explicitly to make expiry
//! deterministic.
//!
//! # Example
//! ```
//! use cortado::clock::{Clock, ManualClock};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let t0 = clock.now();
//! clock.advance(Duration::from_secs(30));
//! assert_eq!(clock.now() - t0, Duration::from_secs(30));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Supplies the current time to the cache.
///
/// The clock must never run backwards: expiry bookkeeping stores offsets
/// from the instant the cache was built.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.  This is the default.
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Anchored at the real instant it was created; [`advance`](ManualClock::advance)
/// moves it forward by an exact amount.  Share it with the cache via `Arc`
/// and keep a second handle to drive time from the test.
pub struct ManualClock {
    base: Instant,
    offset_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            base: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.offset_nanos
            .fetch_add(d.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::Acquire))
    }
}
