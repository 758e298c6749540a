use std::hash::Hash;
use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

use crate::entry::CacheEntry;

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// Cache-line padding to prevent false sharing between shards.
#[repr(align(64))]
pub(crate) struct Shard<K, V> {
    pub(crate) map: RwLock<AHashMap<K, Arc<CacheEntry<K, V>>>>,
}

// ---------------------------------------------------------------------------
// ShardedStore
// ---------------------------------------------------------------------------

/// The concurrent key→entry substrate: `N` independently-locked shards.
///
/// This is the single source of truth for which keys currently exist.
/// Reads take a shared lock, writes an exclusive lock, both per-shard, so
/// operations on unrelated keys never serialize.  Writes to the *same* key
/// serialize on the shard's write lock, which is what makes
/// "check old, remove old, insert new" atomic with respect to other
/// writers of that key.
pub(crate) struct ShardedStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    /// Always `shards.len() - 1`; shards.len() is a power of two.
    shard_mask: usize,
    /// Hasher used only to compute shard indices.
    build_hasher: RandomState,
}

impl<K: Hash + Eq + Clone, V> ShardedStore<K, V> {
    pub(crate) fn new(num_shards: usize) -> Self {
        debug_assert!(num_shards.is_power_of_two());
        let shards = (0..num_shards)
            .map(|_| Shard {
                map: RwLock::new(AHashMap::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        ShardedStore {
            shards,
            shard_mask: num_shards - 1,
            build_hasher: RandomState::new(),
        }
    }

    /// Returns the shard owning `key`.  Callers that need the
    /// check-reserve-swap sequence to be atomic for a key hold this shard's
    /// write lock across it.
    #[inline]
    pub(crate) fn shard(&self, key: &K) -> &Shard<K, V> {
        let h = self.build_hasher.hash_one(key);
        // Use the high bits (better avalanche from ahash).
        &self.shards[((h >> 32) as usize) & self.shard_mask]
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Returns the entry for `key`, or `None` if absent.
    ///
    /// The caller is responsible for the expiry check and, if expired, for
    /// the conditional removal via [`remove_if`](ShardedStore::remove_if).
    pub(crate) fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.shard(key).map.read().get(key).map(Arc::clone)
    }

    /// Removes the entry for `key` unconditionally.
    pub(crate) fn remove(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.shard(key).map.write().remove(key)
    }

    /// Removes `key` only if it still maps to `expected` (pointer identity).
    ///
    /// Expire-on-read, sweeps, signal hooks, and compaction all race to
    /// detach the same entry; whoever wins here owns its eviction dispatch,
    /// and a newer entry committed under the same key is never clobbered.
    pub(crate) fn remove_if(&self, key: &K, expected: &Arc<CacheEntry<K, V>>) -> bool {
        let mut map = self.shard(key).map.write();
        match map.get(key) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Returns every live entry, shard by shard.
    ///
    /// Each shard is snapshotted under its own read lock, so the result is
    /// a consistent view per shard but not across shards — good enough for
    /// compaction and expiration sweeps, which re-check each victim with
    /// [`remove_if`](ShardedStore::remove_if).
    pub(crate) fn snapshot(&self) -> Vec<Arc<CacheEntry<K, V>>> {
        let mut entries = Vec::new();
        for shard in self.shards.iter() {
            let map = shard.map.read();
            entries.reserve(map.len());
            entries.extend(map.values().map(Arc::clone));
        }
        entries
    }

    /// Detaches and returns every entry.
    pub(crate) fn drain(&self) -> Vec<Arc<CacheEntry<K, V>>> {
        let mut entries = Vec::new();
        for shard in self.shards.iter() {
            let mut map = shard.map.write();
            entries.extend(map.drain().map(|(_, entry)| entry));
        }
        entries
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.shard(key).map.read().contains_key(key)
    }

    /// Total number of entries across all shards.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }
}
