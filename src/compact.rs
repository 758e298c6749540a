//! Compaction — the batch-eviction pass that runs under size pressure.
//!
//! Triggered from the insert path, it runs inline on the triggering
//! thread.  A `try_lock` coalesces concurrent triggers.  The pass first
//! sheds every currently-expired entry; if the projected size is still
//! above the low watermark it evicts live entries bucketed by priority
//! (`Low`, then `Normal`, then `High`), oldest access first within each
//! bucket and insertion order breaking ties.  `NeverRemove` entries are
//! never selected, though pass 1 still removes them when they are expired.
//!
//! Victims are re-checked with a pointer-identity conditional removal, so
//! an entry replaced mid-pass is never clobbered, and no shard lock is
//! held longer than a single removal.

use std::hash::Hash;
use std::sync::Arc;

use crate::cache::Inner;
use crate::entry::{CacheEntry, EvictionReason, Priority};
use crate::expiry;

/// Runs a compaction pass if the accounted size exceeds `threshold`.
///
/// The insert path calls this with the size limit after a committed
/// insert, and with the low watermark when a reservation failed — the
/// latter reproduces the "make room before rejecting" behavior of a full
/// cache.
pub(crate) fn compact<K, V>(inner: &Inner<K, V>, threshold: u64)
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let Some(_guard) = inner.compact_lock.try_lock() else {
        return;
    };
    let accounted = inner.size.current();
    if accounted <= threshold {
        return;
    }
    let target = inner.low_watermark;
    let now = inner.now_nanos();

    // The counter may still carry sizes of entries whose dispatch hasn't
    // run; project from a snapshot and subtract locally instead of
    // re-reading it.
    let mut projected = accounted;

    let mut survivors: Vec<Arc<CacheEntry<K, V>>> = Vec::new();
    for entry in inner.store.snapshot() {
        match expiry::expired_reason(&entry, now) {
            Some(reason) => {
                if inner.store.remove_if(entry.key(), &entry) {
                    projected = projected.saturating_sub(entry.charged_size());
                    inner.retire(entry, reason);
                }
            }
            None => survivors.push(entry),
        }
    }
    if projected <= target {
        tracing::debug!(
            before = accounted,
            after = projected,
            "compaction satisfied by expired entries"
        );
        return;
    }

    let mut buckets: [Vec<Arc<CacheEntry<K, V>>>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for entry in survivors {
        match entry.priority() {
            Priority::Low => buckets[0].push(entry),
            Priority::Normal => buckets[1].push(entry),
            Priority::High => buckets[2].push(entry),
            Priority::NeverRemove => {}
        }
    }

    'evict: for bucket in buckets.iter_mut() {
        bucket.sort_by_key(|entry| (entry.last_accessed(), entry.seq()));
        for entry in bucket.drain(..) {
            if projected <= target {
                break 'evict;
            }
            if inner.store.remove_if(entry.key(), &entry) {
                projected = projected.saturating_sub(entry.charged_size());
                inner.retire(entry, EvictionReason::Capacity);
            }
        }
    }

    tracing::debug!(
        before = accounted,
        after = projected,
        "compaction pass complete"
    );
}
