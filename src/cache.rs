use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::accounting::SizeCounter;
use crate::builder::CacheBuilder;
use crate::clock::Clock;
use crate::compact;
use crate::dispatch::{EvictionDispatcher, WorkDispatcher};
use crate::entry::{CacheEntry, EntryOptions, EvictionReason};
use crate::error::InsertError;
use crate::expiry::{self, ScanGate};
use crate::metrics::{Metrics, StatsCounter};
use crate::signal::ChangeSignal;
use crate::store::ShardedStore;

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

/// Shared interior of a [`Cache`].
pub(crate) struct Inner<K, V> {
    pub(crate) store: ShardedStore<K, V>,
    pub(crate) size: Arc<SizeCounter>,
    pub(crate) limit: Option<u64>,
    /// `size_limit × (1 − compaction_percentage)`, floored.  Compaction
    /// evicts down to this.  0 when the cache is unbounded.
    pub(crate) low_watermark: u64,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) epoch: Instant,
    pub(crate) dispatch: EvictionDispatcher,
    pub(crate) scan_gate: ScanGate,
    /// Coalesces concurrent compaction triggers; contenders skip.
    pub(crate) compact_lock: Mutex<()>,
    seq: AtomicU64,
    pub(crate) metrics: StatsCounter,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    #[inline]
    pub(crate) fn now_nanos(&self) -> u64 {
        self.clock
            .now()
            .checked_duration_since(self.epoch)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64
    }

    #[inline]
    fn instant_to_nanos(&self, instant: Instant) -> u64 {
        instant
            .checked_duration_since(self.epoch)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64
    }

    #[inline]
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Collapses the two absolute-expiration inputs into a single deadline.
    /// When both are given, the earlier one wins.
    fn resolve_deadline(
        &self,
        now: u64,
        at: Option<Instant>,
        after: Option<Duration>,
    ) -> Option<u64> {
        let at = at.map(|t| self.instant_to_nanos(t));
        let after = after.map(|d| now.saturating_add(d.as_nanos() as u64));
        match (at, after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Hands a detached (or rejected) entry to the eviction dispatcher.
    ///
    /// Must be called with no store locks held: the dispatcher may be an
    /// inline one, and callbacks may re-enter the cache.
    pub(crate) fn retire(&self, entry: Arc<CacheEntry<K, V>>, reason: EvictionReason) {
        entry.mark_retired();
        match reason {
            EvictionReason::Capacity => self.metrics.record_eviction(),
            EvictionReason::Expired | EvictionReason::SignalFired => {
                self.metrics.record_expiration()
            }
            EvictionReason::Removed | EvictionReason::Replaced => {}
        }
        self.dispatch.dispatch(entry, reason, Arc::clone(&self.size));
    }

    /// Runs a full-store expiration sweep if the scan interval has elapsed.
    /// The single reachable entry point for opportunistic scanning.
    pub(crate) fn maybe_scan(&self, now: u64) {
        if self.scan_gate.should_scan(now) {
            self.scan_expired(now);
        }
    }

    fn scan_expired(&self, now: u64) {
        let mut swept = 0u64;
        for entry in self.store.snapshot() {
            if let Some(reason) = expiry::expired_reason(&entry, now) {
                if self.store.remove_if(entry.key(), &entry) {
                    self.retire(entry, reason);
                    swept += 1;
                }
            }
        }
        if swept > 0 {
            tracing::debug!(swept, "expiration sweep removed entries");
        }
    }
}

/// Registers store-side removal hooks on every hook-capable signal, so a
/// firing signal evicts the entry without waiting for the next sweep.
///
/// Poll-only signals decline the hook and are caught by reads and sweeps.
fn register_hooks<K, V>(
    inner: &Arc<Inner<K, V>>,
    entry: &Arc<CacheEntry<K, V>>,
    signals: &[Arc<dyn ChangeSignal>],
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    for signal in signals {
        let weak_inner = Arc::downgrade(inner);
        let weak_entry = Arc::downgrade(entry);
        let key = entry.key().clone();
        signal.on_fire(Box::new(move || {
            let (Some(inner), Some(entry)) = (weak_inner.upgrade(), weak_entry.upgrade()) else {
                return;
            };
            if inner.store.remove_if(&key, &entry) {
                inner.retire(entry, EvictionReason::SignalFired);
            }
        }));
    }
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A concurrent, size- and time-bounded in-memory cache.
///
/// Entries carry their own expiration rules, size, priority, and
/// post-eviction callbacks; when the accounted size exceeds the configured
/// limit, a compaction pass sheds expired entries first and then the
/// least-recently-used entries of the lowest priority.
///
/// # Size is eventually consistent
///
/// [`size`](Cache::size) reads an atomic counter whose decrements run on
/// the eviction dispatcher, not on the thread that removed the entry.  An
/// entry can be gone from the map while its size is still counted.  Code
/// that needs the settled value after a removal must poll with
/// retry/backoff; this is a documented contract, not a defect.
///
/// # Example
/// ```
/// use cortado::Cache;
/// use std::sync::Arc;
///
/// let cache: Cache<String, String> = Cache::builder().build();
/// cache.insert("hello".to_string(), "world".to_string()).unwrap();
/// assert_eq!(
///     cache.get(&"hello".to_string()),
///     Some(Arc::new("world".to_string()))
/// );
/// ```
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(
        limit: Option<u64>,
        low_watermark: u64,
        scan_frequency: Duration,
        num_shards: usize,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn WorkDispatcher>,
    ) -> Self {
        let epoch = clock.now();
        Cache {
            inner: Arc::new(Inner {
                store: ShardedStore::new(num_shards),
                size: Arc::new(SizeCounter::new(limit)),
                limit,
                low_watermark,
                clock,
                epoch,
                dispatch: EvictionDispatcher::new(dispatcher),
                scan_gate: ScanGate::new(scan_frequency.as_nanos() as u64),
                compact_lock: Mutex::new(()),
                seq: AtomicU64::new(0),
                metrics: StatsCounter::new(),
            }),
        }
    }

    /// Returns a [`CacheBuilder`] for configuring a new cache.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    // -----------------------------------------------------------------------
    // Hot-path: get
    // -----------------------------------------------------------------------

    /// Returns the value for `key` if it exists and has not expired.
    ///
    /// Absence and expiry are indistinguishable to the caller.  An entry
    /// found expired is removed as a side effect of the read and its
    /// eviction dispatched.  A successful read refreshes the entry's
    /// last-accessed stamp.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let inner = &self.inner;
        let now = inner.now_nanos();
        let Some(entry) = inner.store.get(key) else {
            inner.metrics.record_miss();
            return None;
        };
        if let Some(reason) = expiry::expired_reason(&entry, now) {
            if inner.store.remove_if(key, &entry) {
                tracing::trace!(?reason, "entry expired at read time");
                inner.retire(entry, reason);
            }
            inner.metrics.record_miss();
            return None;
        }
        entry.touch(now);
        inner.metrics.record_hit();
        Some(Arc::clone(entry.value()))
    }

    // -----------------------------------------------------------------------
    // Hot-path: insert
    // -----------------------------------------------------------------------

    /// Inserts `value` for `key` with default options.
    ///
    /// Errors if the cache has a size limit, because every entry must then
    /// declare a size — use [`insert_with`](Cache::insert_with).
    pub fn insert(&self, key: K, value: V) -> Result<(), InsertError> {
        self.insert_with(key, value, EntryOptions::new())
    }

    /// Inserts `value` for `key`.  An existing value under the key is
    /// replaced and its eviction notified with
    /// [`EvictionReason::Replaced`], independent of capacity.
    ///
    /// An entry that is already expired at commit time, or that cannot fit
    /// within the size limit even after a fresh compaction pass, is *not*
    /// retained: the call still returns `Ok(())`, the key ends up absent,
    /// and the outcome is observable through the entry's eviction
    /// callbacks (`Expired`/`SignalFired`/`Capacity`).
    pub fn insert_with(
        &self,
        key: K,
        value: V,
        options: EntryOptions<K, V>,
    ) -> Result<(), InsertError> {
        self.insert_arc(key, Arc::new(value), options)
    }

    /// Inserts `value` for `key` and links its expiration to the entry
    /// currently committed under `parent`: the child's change signals are
    /// added to the parent's subscriptions and the parent's absolute
    /// deadline is tightened to the child's if earlier.
    ///
    /// The link is an explicit alternative to ambient "current entry"
    /// scopes: composition is visible at the call site and needs no
    /// thread-local state.
    pub fn insert_linked(
        &self,
        key: K,
        value: V,
        options: EntryOptions<K, V>,
        parent: &K,
    ) -> Result<(), InsertError> {
        let now = self.inner.now_nanos();
        let child_deadline =
            self.inner
                .resolve_deadline(now, options.expires_at, options.expires_after);
        let child_signals = options.signals.clone();
        self.insert_arc(key, Arc::new(value), options)?;
        if let Some(parent_entry) = self.inner.store.get(parent) {
            if let Some(deadline) = child_deadline {
                parent_entry.tighten_deadline(deadline);
            }
            if !child_signals.is_empty() {
                parent_entry.extend_signals(&child_signals);
                register_hooks(&self.inner, &parent_entry, &child_signals);
            }
        }
        Ok(())
    }

    /// Returns the value for `key`, computing and inserting it on a miss.
    ///
    /// The computed value is returned even when the insert itself was
    /// rejected (over capacity, or expired at commit); the key is simply
    /// absent afterwards.  Concurrent callers may race and each compute —
    /// the store keeps whichever commit lands last.
    pub fn get_or_insert_with<F>(
        &self,
        key: K,
        options: EntryOptions<K, V>,
        init: F,
    ) -> Result<Arc<V>, InsertError>
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = Arc::new(init());
        self.insert_arc(key, Arc::clone(&value), options)?;
        Ok(value)
    }

    fn insert_arc(
        &self,
        key: K,
        value: Arc<V>,
        options: EntryOptions<K, V>,
    ) -> Result<(), InsertError> {
        let inner = &self.inner;
        if inner.limit.is_some() && options.size.is_none() {
            return Err(InsertError::SizeRequired);
        }
        let now = inner.now_nanos();
        let deadline = inner.resolve_deadline(now, options.expires_at, options.expires_after);
        let entry = Arc::new(CacheEntry::from_options(
            key.clone(),
            value,
            options,
            deadline,
            now,
            inner.next_seq(),
        ));

        // Dead on arrival: a deadline already in the past or a signal that
        // already fired.  The entry is never committed and never counted;
        // any prior entry under the key is superseded all the same.
        if let Some(reason) = expiry::expired_reason(&entry, now) {
            if let Some(prior) = inner.store.remove(&key) {
                inner.retire(prior, EvictionReason::Replaced);
            }
            inner.retire(entry, reason);
            inner.maybe_scan(now);
            return Ok(());
        }

        let incoming = entry.charged_size();
        let mut compacted = false;
        loop {
            let shard = inner.store.shard(&key);
            let mut map = shard.map.write();
            let outgoing = map.get(&key).map(|prior| prior.charged_size()).unwrap_or(0);
            if inner.size.try_reserve(incoming, outgoing) {
                entry.mark_committed();
                let prior = map.insert(key.clone(), Arc::clone(&entry));
                drop(map);
                if let Some(prior) = prior {
                    // Release the superseded size before the over-limit
                    // check below; the transient double-count would
                    // otherwise trip a spurious compaction.
                    prior.release_size(&inner.size);
                    inner.retire(prior, EvictionReason::Replaced);
                }
                let signals = entry.signals_snapshot();
                if !signals.is_empty() {
                    register_hooks(inner, &entry, &signals);
                }
                inner.maybe_scan(now);
                if let Some(limit) = inner.limit {
                    compact::compact(inner, limit);
                }
                return Ok(());
            }
            drop(map);

            if !compacted {
                compacted = true;
                compact::compact(inner, inner.low_watermark);
                continue;
            }

            // No room even after a fresh compaction pass.  The candidate is
            // dropped with reason Capacity; a prior entry under the key is
            // still superseded, so the key ends up absent rather than
            // reverting to the old value.
            if let Some(prior) = inner.store.remove(&key) {
                inner.retire(prior, EvictionReason::Replaced);
            }
            inner.retire(entry, EvictionReason::Capacity);
            inner.maybe_scan(now);
            return Ok(());
        }
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes the entry for `key`, if present, with
    /// [`EvictionReason::Removed`].
    pub fn remove(&self, key: &K) {
        let now = self.inner.now_nanos();
        if let Some(entry) = self.inner.store.remove(key) {
            self.inner.retire(entry, EvictionReason::Removed);
        }
        self.inner.maybe_scan(now);
    }

    /// Detaches every entry and dispatches each eviction with
    /// [`EvictionReason::Removed`].
    ///
    /// The detached entries' sizes are released before dispatch, so with
    /// no other evictions in flight the accounted size is 0 on return.
    pub fn clear(&self) {
        for entry in self.inner.store.drain() {
            entry.release_size(&self.inner.size);
            self.inner.retire(entry, EvictionReason::Removed);
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// The accounted total size.  **Eventually consistent** — see the type
    /// docs.
    pub fn size(&self) -> u64 {
        self.inner.size.current()
    }

    /// Number of entries currently in the store, including entries whose
    /// expiration has not yet been observed by a read or a sweep.
    pub fn entry_count(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Whether `key` is present, without refreshing its recency or
    /// observing expiry.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.store.contains(key)
    }

    pub fn stats(&self) -> Metrics {
        self.inner.metrics.snapshot()
    }
}
