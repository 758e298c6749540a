//! cortado: a size- and time-bounded in-memory cache.
//!
//! Entries carry their own size, priority, expiration rules (absolute,
//! sliding, and external change signals), and post-eviction callbacks.
//! When the accounted size exceeds the configured limit, a compaction pass
//! evicts expired entries first and then least-recently-used entries in
//! priority order, down to a low watermark.  Eviction callbacks run on a
//! work dispatcher, never on the thread that triggered the removal.
//!
//! The exposed size is **eventually consistent** with the store's
//! contents; see [`Cache`] for the exact contract.

mod accounting;
mod builder;
mod cache;
mod compact;
mod entry;
mod error;
mod expiry;
mod metrics;
mod store;

pub mod clock;
pub mod dispatch;
pub mod signal;

pub use builder::CacheBuilder;
pub use cache::Cache;
pub use entry::{EntryOptions, EvictionReason, Priority};
pub use error::{ConfigError, InsertError};
pub use metrics::Metrics;
