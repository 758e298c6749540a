use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::clock::{Clock, SystemClock};
use crate::dispatch::{BackgroundDispatcher, WorkDispatcher};
use crate::error::ConfigError;

/// Builder for configuring and constructing a [`Cache`].
///
/// All configuration is immutable once the cache is built.  Invalid
/// configuration fails eagerly: [`try_build`](CacheBuilder::try_build)
/// returns a [`ConfigError`], [`build`](CacheBuilder::build) panics on the
/// same conditions.
///
/// # Example
/// ```
/// use cortado::{Cache, CacheBuilder};
/// use std::time::Duration;
///
/// let cache: Cache<String, Vec<u8>> = CacheBuilder::new()
///     .size_limit(64 * 1024 * 1024)
///     .compaction_percentage(0.2)
///     .scan_frequency(Duration::from_secs(30))
///     .build();
/// ```
pub struct CacheBuilder<K, V> {
    size_limit: Option<u64>,
    compaction_percentage: f64,
    scan_frequency: Duration,
    num_shards: usize,
    clock: Arc<dyn Clock>,
    dispatcher: Option<Arc<dyn WorkDispatcher>>,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> CacheBuilder<K, V> {
    pub fn new() -> Self {
        CacheBuilder {
            size_limit: None,
            compaction_percentage: 0.05,
            scan_frequency: Duration::from_secs(60),
            num_shards: 16,
            clock: Arc::new(SystemClock),
            dispatcher: None,
            _marker: PhantomData,
        }
    }

    /// Caps the accounted total size.  Once a limit is set, every inserted
    /// entry must declare a size.  Unset = unbounded (the default).
    pub fn size_limit(mut self, limit: u64) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Fraction of the limit to shed when compaction triggers: the pass
    /// evicts down to `size_limit × (1 − percentage)`.  Default: 0.05.
    pub fn compaction_percentage(mut self, percentage: f64) -> Self {
        self.compaction_percentage = percentage;
        self
    }

    /// Minimum interval between opportunistic expiration sweeps.  Zero
    /// disables throttling — every mutating call sweeps.  Default: 60 s.
    pub fn scan_frequency(mut self, frequency: Duration) -> Self {
        self.scan_frequency = frequency;
        self
    }

    /// Set the number of internal shards (must be a power of two; default: 16).
    pub fn num_shards(mut self, n: usize) -> Self {
        self.num_shards = n;
        self
    }

    /// Substitutes the time source.  Tests pair this with
    /// [`ManualClock`](crate::clock::ManualClock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Substitutes the facility that runs eviction callbacks off the
    /// calling thread.  Default: a dedicated [`BackgroundDispatcher`]
    /// worker thread per cache; caches may share one by passing the same
    /// `Arc`.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn WorkDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn try_build(self) -> Result<Cache<K, V>, ConfigError> {
        if self.size_limit == Some(0) {
            return Err(ConfigError::ZeroSizeLimit);
        }
        if !(0.0..=1.0).contains(&self.compaction_percentage) {
            return Err(ConfigError::CompactionPercentage(self.compaction_percentage));
        }
        if self.num_shards == 0 || !self.num_shards.is_power_of_two() {
            return Err(ConfigError::Shards(self.num_shards));
        }

        let low_watermark = self
            .size_limit
            .map(|limit| (limit as f64 * (1.0 - self.compaction_percentage)).floor() as u64)
            .unwrap_or(0);
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(BackgroundDispatcher::new()));

        Ok(Cache::new(
            self.size_limit,
            low_watermark,
            self.scan_frequency,
            self.num_shards,
            self.clock,
            dispatcher,
        ))
    }

    /// # Panics
    ///
    /// On the conditions [`try_build`](CacheBuilder::try_build) reports as
    /// [`ConfigError`].
    pub fn build(self) -> Cache<K, V> {
        match self.try_build() {
            Ok(cache) => cache,
            Err(e) => panic!("invalid cache configuration: {e}"),
        }
    }
}
