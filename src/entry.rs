use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::accounting::SizeCounter;
use crate::signal::ChangeSignal;

/// Sentinel deadline meaning "never expires on the clock".
pub(crate) const NO_EXPIRY: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Eviction-order hint.  Higher priority resists compaction longer.
///
/// `NeverRemove` entries are exempt from compaction entirely; they still
/// leave the cache through explicit removal, replacement, or their own
/// expiration rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    NeverRemove,
}

// ---------------------------------------------------------------------------
// EvictionReason
// ---------------------------------------------------------------------------

/// Why an entry left the cache.  Delivered to post-eviction callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionReason {
    /// Removed explicitly via [`Cache::remove`] or [`Cache::clear`].
    ///
    /// [`Cache::remove`]: crate::Cache::remove
    /// [`Cache::clear`]: crate::Cache::clear
    Removed,
    /// Superseded by a newer value for the same key.
    Replaced,
    /// An absolute or sliding expiration elapsed.
    Expired,
    /// A subscribed change signal fired.
    SignalFired,
    /// Chosen by the compaction engine, or rejected on insert because it
    /// could not fit within the size limit.
    Capacity,
}

// ---------------------------------------------------------------------------
// Entry lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of an entry.
///
/// `Pending` entries are under construction and contribute nothing to the
/// accounted size.  A `Pending` entry that fails commit-time validation
/// goes straight to `Retired` without ever being `Committed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum EntryState {
    Pending = 0,
    Committed = 1,
    /// Detached from the store; callbacks queued but not yet delivered.
    Retired = 2,
    /// Callbacks delivered.  Terminal.
    Disposed = 3,
}

// ---------------------------------------------------------------------------
// Eviction callbacks
// ---------------------------------------------------------------------------

type EvictionHook<K, V> =
    dyn Fn(&K, &Arc<V>, EvictionReason, Option<&(dyn Any + Send + Sync)>) + Send + Sync;

/// One registered post-eviction callback plus its opaque user state.
pub(crate) struct EvictionCallback<K, V> {
    hook: Box<EvictionHook<K, V>>,
    state: Option<Box<dyn Any + Send + Sync>>,
}

// ---------------------------------------------------------------------------
// EntryOptions
// ---------------------------------------------------------------------------

/// Per-entry configuration passed to [`Cache::insert_with`].
///
/// # Example
/// ```
/// use cortado::{EntryOptions, Priority};
/// use std::time::Duration;
///
/// let options: EntryOptions<String, Vec<u8>> = EntryOptions::new()
///     .size(4096)
///     .priority(Priority::High)
///     .expires_after(Duration::from_secs(300))
///     .sliding(Duration::from_secs(60));
/// ```
///
/// [`Cache::insert_with`]: crate::Cache::insert_with
pub struct EntryOptions<K, V> {
    pub(crate) size: Option<u64>,
    pub(crate) priority: Priority,
    pub(crate) expires_at: Option<Instant>,
    pub(crate) expires_after: Option<Duration>,
    pub(crate) sliding: Option<Duration>,
    pub(crate) signals: Vec<Arc<dyn ChangeSignal>>,
    pub(crate) callbacks: Vec<EvictionCallback<K, V>>,
}

impl<K, V> EntryOptions<K, V> {
    pub fn new() -> Self {
        EntryOptions {
            size: None,
            priority: Priority::Normal,
            expires_at: None,
            expires_after: None,
            sliding: None,
            signals: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Declares the entry's size in the cache's units.
    ///
    /// Required for every entry when the cache has a size limit.  The size
    /// is immutable once the entry is committed; replacing the value
    /// creates a new entry with its own size.
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// The entry expires at the given instant (measured by the cache clock).
    ///
    /// If [`expires_after`](EntryOptions::expires_after) is also set, the
    /// earlier of the two deadlines wins.
    pub fn expires_at(mut self, at: Instant) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// The entry expires `d` after it is inserted.
    pub fn expires_after(mut self, d: Duration) -> Self {
        self.expires_after = Some(d);
        self
    }

    /// The entry expires once it has gone `d` without being read.
    pub fn sliding(mut self, d: Duration) -> Self {
        self.sliding = Some(d);
        self
    }

    /// Subscribes the entry to a change signal.  Repeatable.
    pub fn signal(mut self, signal: Arc<dyn ChangeSignal>) -> Self {
        self.signals.push(signal);
        self
    }

    /// Registers a post-eviction callback.
    ///
    /// Callbacks run on the cache's work dispatcher, never on the thread
    /// that triggered the removal, and each fires exactly once.
    pub fn on_evict<F>(mut self, hook: F) -> Self
    where
        F: Fn(&K, &Arc<V>, EvictionReason) + Send + Sync + 'static,
    {
        self.callbacks.push(EvictionCallback {
            hook: Box::new(move |key, value, reason, _| hook(key, value, reason)),
            state: None,
        });
        self
    }

    /// Like [`on_evict`](EntryOptions::on_evict), with an opaque state value
    /// handed back to the callback.
    pub fn on_evict_with<F, S>(mut self, hook: F, state: S) -> Self
    where
        F: Fn(&K, &Arc<V>, EvictionReason, Option<&(dyn Any + Send + Sync)>)
            + Send
            + Sync
            + 'static,
        S: Any + Send + Sync,
    {
        self.callbacks.push(EvictionCallback {
            hook: Box::new(hook),
            state: Some(Box::new(state)),
        });
        self
    }
}

impl<K, V> Default for EntryOptions<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// One cache slot's full state.  Owned by the store, shared by `Arc` with
/// in-flight readers and the eviction dispatcher.
pub(crate) struct CacheEntry<K, V> {
    key: K,
    value: Arc<V>,
    size: Option<u64>,
    priority: Priority,
    sliding: Option<Duration>,
    /// Absolute deadline in nanos since the cache epoch; [`NO_EXPIRY`] when
    /// unset.  Atomic so a parent link can tighten it after commit.
    expires_at: AtomicU64,
    /// Nanos since the cache epoch of the last successful read.
    last_accessed: AtomicU64,
    /// Insertion sequence number; breaks `last_accessed` ties during
    /// compaction deterministically.
    seq: u64,
    state: AtomicU8,
    /// Whether this entry's size is currently in the accounted total.
    size_charged: AtomicBool,
    signals: Mutex<Vec<Arc<dyn ChangeSignal>>>,
    callbacks: Mutex<Vec<EvictionCallback<K, V>>>,
}

impl<K, V> CacheEntry<K, V> {
    pub(crate) fn from_options(
        key: K,
        value: Arc<V>,
        options: EntryOptions<K, V>,
        deadline: Option<u64>,
        now: u64,
        seq: u64,
    ) -> Self {
        CacheEntry {
            key,
            value,
            size: options.size,
            priority: options.priority,
            sliding: options.sliding,
            expires_at: AtomicU64::new(deadline.unwrap_or(NO_EXPIRY)),
            last_accessed: AtomicU64::new(now),
            seq,
            state: AtomicU8::new(EntryState::Pending as u8),
            size_charged: AtomicBool::new(false),
            signals: Mutex::new(options.signals),
            callbacks: Mutex::new(options.callbacks),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub(crate) fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// The size this entry contributes to the accounted total (0 when no
    /// size was declared, which is only legal on an unbounded cache).
    #[inline]
    pub(crate) fn charged_size(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    #[inline]
    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub(crate) fn sliding(&self) -> Option<Duration> {
        self.sliding
    }

    #[inline]
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub(crate) fn deadline(&self) -> u64 {
        self.expires_at.load(Ordering::Acquire)
    }

    /// Moves the deadline earlier, never later.  Used by parent links.
    pub(crate) fn tighten_deadline(&self, deadline: u64) {
        self.expires_at.fetch_min(deadline, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Acquire)
    }

    /// Records a successful read; drives sliding expiry and LRU ordering.
    #[inline]
    pub(crate) fn touch(&self, now: u64) {
        self.last_accessed.store(now, Ordering::Release);
    }

    pub(crate) fn any_signal_fired(&self) -> bool {
        self.signals.lock().iter().any(|s| s.has_fired())
    }

    pub(crate) fn signals_snapshot(&self) -> Vec<Arc<dyn ChangeSignal>> {
        self.signals.lock().clone()
    }

    /// Appends more signal subscriptions.  Used by parent links.
    pub(crate) fn extend_signals(&self, signals: &[Arc<dyn ChangeSignal>]) {
        self.signals.lock().extend(signals.iter().cloned());
    }

    /// Marks the entry visible in the store and its size as accounted.
    pub(crate) fn mark_committed(&self) {
        self.size_charged.store(true, Ordering::Release);
        self.state
            .store(EntryState::Committed as u8, Ordering::Release);
    }

    /// Marks the entry detached from the store, callbacks pending.
    pub(crate) fn mark_retired(&self) {
        self.state.store(EntryState::Retired as u8, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> EntryState {
        match self.state.load(Ordering::Acquire) {
            0 => EntryState::Pending,
            1 => EntryState::Committed,
            2 => EntryState::Retired,
            _ => EntryState::Disposed,
        }
    }

    /// Subtracts this entry's size from `counter`, at most once, and only
    /// if the entry was ever committed.
    pub(crate) fn release_size(&self, counter: &SizeCounter) {
        if self.size_charged.swap(false, Ordering::AcqRel) {
            counter.release(self.charged_size());
        }
    }

    /// Delivers every registered callback exactly once, isolating panics,
    /// then marks the entry disposed.
    pub(crate) fn run_callbacks(&self, reason: EvictionReason) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (callback.hook)(&self.key, &self.value, reason, callback.state.as_deref());
            }));
            if outcome.is_err() {
                tracing::error!(?reason, "post-eviction callback panicked");
            }
        }
        self.state
            .store(EntryState::Disposed as u8, Ordering::Release);
    }
}
