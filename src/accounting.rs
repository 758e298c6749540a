//! Size accounting — one atomic aggregate of all committed entry sizes.
//!
//! The counter is updated with lock-free compare-and-swap only; it is never
//! read or written under a store lock.  Decrements happen when an eviction
//! is *dispatched*, which may run after the entry has already left the
//! store, so the counter is eventually — not instantaneously — consistent
//! with the store's contents.  See the crate-level docs for the consumer
//! contract.

use std::sync::atomic::{AtomicU64, Ordering};

/// The accounted total of all committed entry sizes, plus the configured
/// limit it is checked against.
pub(crate) struct SizeCounter {
    current: AtomicU64,
    limit: Option<u64>,
}

impl SizeCounter {
    pub(crate) fn new(limit: Option<u64>) -> Self {
        SizeCounter {
            current: AtomicU64::new(0),
            limit,
        }
    }

    #[inline]
    pub(crate) fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Attempts to reserve `incoming` units for a candidate entry that will
    /// replace an entry of committed size `outgoing` (0 if the key is new).
    ///
    /// The over-limit check uses the *net* projection
    /// `current − outgoing + incoming`, because the replaced entry's units
    /// are still in the counter until its eviction is dispatched.  Addition
    /// overflow is treated identically to exceeding the limit: the
    /// reservation fails and the counter is untouched.
    ///
    /// Without a configured limit the reservation always succeeds — size is
    /// still tracked, only enforcement is skipped.
    pub(crate) fn try_reserve(&self, incoming: u64, outgoing: u64) -> bool {
        let mut cur = self.current.load(Ordering::Acquire);
        loop {
            let next = match cur.checked_add(incoming) {
                Some(next) => next,
                // Saturate rather than fail when unbounded: there is no
                // rejection channel without a limit.
                None if self.limit.is_none() => u64::MAX,
                None => return false,
            };
            if let Some(limit) = self.limit {
                let projected = cur.saturating_sub(outgoing).saturating_add(incoming);
                if projected > limit {
                    return false;
                }
            }
            match self
                .current
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(seen) => cur = seen,
            }
        }
    }

    /// Subtracts `amount`, flooring at zero.  Never wraps.
    pub(crate) fn release(&self, amount: u64) {
        if amount == 0 {
            return;
        }
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_sub(amount))
            });
    }
}
