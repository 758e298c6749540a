//! Eviction dispatch — post-eviction work runs off the caller's thread.
//!
//! The cache never invokes eviction callbacks synchronously from `insert`,
//! `get`, `remove`, `clear`, or a compaction pass.  Retired entries are
//! handed to a [`WorkDispatcher`], an externally supplied facility that
//! executes zero-argument jobs independently of the calling thread.  The
//! default is a [`BackgroundDispatcher`] owning one worker thread; tests
//! that want deterministic callback timing substitute an
//! [`InlineDispatcher`].
//!
//! The dispatched job also performs the size decrement, which is why the
//! accounted size is eventually consistent with the store's contents.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::accounting::SizeCounter;
use crate::entry::{CacheEntry, EvictionReason};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send>;

/// Executes jobs independently of the calling thread.
///
/// Implementations must not drop jobs: every queued job carries an
/// eviction notification and a size decrement.
pub trait WorkDispatcher: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

// ---------------------------------------------------------------------------
// InlineDispatcher
// ---------------------------------------------------------------------------

/// Runs each job on the thread that submitted it.
///
/// Forfeits the asynchrony contract in exchange for determinism; intended
/// for tests and single-threaded tooling.  Callbacks must not re-enter the
/// cache when this dispatcher is installed.
pub struct InlineDispatcher;

impl WorkDispatcher for InlineDispatcher {
    fn execute(&self, job: Job) {
        job();
    }
}

// ---------------------------------------------------------------------------
// BackgroundDispatcher
// ---------------------------------------------------------------------------

/// A single worker thread draining an unbounded lock-free queue.
///
/// Dropping the dispatcher drains the queue before the worker exits, so no
/// eviction notification is lost at shutdown.
pub struct BackgroundDispatcher {
    queue: Arc<SegQueue<Job>>,
    gate: Arc<(Mutex<bool>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundDispatcher {
    pub fn new() -> Self {
        let queue: Arc<SegQueue<Job>> = Arc::new(SegQueue::new());
        let gate = Arc::new((Mutex::new(false), Condvar::new()));

        let worker = {
            let queue = Arc::clone(&queue);
            let gate = Arc::clone(&gate);
            std::thread::Builder::new()
                .name("cortado-eviction".into())
                .spawn(move || loop {
                    while let Some(job) = queue.pop() {
                        job();
                    }
                    let (lock, cvar) = (&gate.0, &gate.1);
                    let mut shutdown = lock.lock();
                    if queue.is_empty() {
                        if *shutdown {
                            break;
                        }
                        cvar.wait(&mut shutdown);
                    }
                })
                .expect("spawn eviction dispatcher thread")
        };

        BackgroundDispatcher {
            queue,
            gate,
            worker: Some(worker),
        }
    }
}

impl Default for BackgroundDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkDispatcher for BackgroundDispatcher {
    fn execute(&self, job: Job) {
        self.queue.push(job);
        let _guard = self.gate.0.lock();
        self.gate.1.notify_one();
    }
}

impl Drop for BackgroundDispatcher {
    fn drop(&mut self) {
        *self.gate.0.lock() = true;
        self.gate.1.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ---------------------------------------------------------------------------
// EvictionDispatcher
// ---------------------------------------------------------------------------

/// Hands retired entries to the work dispatcher.
///
/// The queued job subtracts the entry's size from the accounted total
/// (idempotently, and only if the entry was ever committed) and then
/// delivers the entry's callbacks exactly once.
pub(crate) struct EvictionDispatcher {
    executor: Arc<dyn WorkDispatcher>,
}

impl EvictionDispatcher {
    pub(crate) fn new(executor: Arc<dyn WorkDispatcher>) -> Self {
        EvictionDispatcher { executor }
    }

    pub(crate) fn dispatch<K, V>(
        &self,
        entry: Arc<CacheEntry<K, V>>,
        reason: EvictionReason,
        size: Arc<SizeCounter>,
    ) where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.executor.execute(Box::new(move || {
            entry.release_size(&size);
            entry.run_callbacks(reason);
        }));
    }
}
