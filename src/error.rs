//! Error types for the cache.
//!
//! Configuration and caller errors fail eagerly at the point of misuse.
//! Capacity rejections and expiry outcomes are deliberately *not* errors —
//! they are observable only through the eviction-callback channel.

use thiserror::Error;

/// Invalid cache configuration, reported by [`CacheBuilder::try_build`].
///
/// [`CacheBuilder::try_build`]: crate::CacheBuilder::try_build
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A size limit was explicitly set to zero.  Omit the limit for an
    /// unbounded cache instead.
    #[error("size_limit must be greater than 0 when set")]
    ZeroSizeLimit,

    /// The compaction percentage falls outside `[0.0, 1.0]` (or is NaN).
    #[error("compaction_percentage must be within [0.0, 1.0], got {0}")]
    CompactionPercentage(f64),

    /// The shard count is zero or not a power of two.
    #[error("num_shards must be a non-zero power of two, got {0}")]
    Shards(usize),
}

/// Caller error on insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InsertError {
    /// The cache enforces a size limit, so every entry must declare a size
    /// via [`EntryOptions::size`](crate::EntryOptions::size).
    #[error("an entry size is required when the cache has a size limit")]
    SizeRequired,
}
