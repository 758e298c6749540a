//! Expiration rules and the opportunistic scan gate.
//!
//! An entry is judged expired by the first matching rule, in order:
//! absolute deadline, fired change signal, sliding window since the last
//! access.  The reason reported to callbacks reflects the rule that fired.
//!
//! There is no timer thread.  Full-store sweeps piggyback on caller
//! traffic: every mutating facade call asks the [`ScanGate`] whether the
//! configured scan interval has elapsed, and at most one caller at a time
//! is elected to walk the store.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::{CacheEntry, EvictionReason, NO_EXPIRY};

/// Returns the reason `entry` is expired at `now` (nanos since the cache
/// epoch), or `None` if it is still live.
pub(crate) fn expired_reason<K, V>(
    entry: &CacheEntry<K, V>,
    now: u64,
) -> Option<EvictionReason> {
    let deadline = entry.deadline();
    if deadline != NO_EXPIRY && now >= deadline {
        return Some(EvictionReason::Expired);
    }
    if entry.any_signal_fired() {
        return Some(EvictionReason::SignalFired);
    }
    if let Some(window) = entry.sliding() {
        if now.saturating_sub(entry.last_accessed()) >= window.as_nanos() as u64 {
            return Some(EvictionReason::Expired);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// ScanGate
// ---------------------------------------------------------------------------

/// Decides when the next full-store expiration sweep is due.
///
/// A zero frequency disables throttling entirely: every mutating call
/// sweeps.  Otherwise a compare-and-swap on the last-scan stamp elects
/// exactly one of the concurrent callers.
pub(crate) struct ScanGate {
    frequency_nanos: u64,
    last_scan: AtomicU64,
}

impl ScanGate {
    pub(crate) fn new(frequency_nanos: u64) -> Self {
        ScanGate {
            frequency_nanos,
            last_scan: AtomicU64::new(0),
        }
    }

    pub(crate) fn should_scan(&self, now: u64) -> bool {
        if self.frequency_nanos == 0 {
            return true;
        }
        let last = self.last_scan.load(Ordering::Acquire);
        now.saturating_sub(last) >= self.frequency_nanos
            && self
                .last_scan
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }
}
