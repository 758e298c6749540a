//! Change signals — external capabilities that invalidate entries.
//!
//! An entry may subscribe to any number of signals.  Once a signal reports
//! that it has fired, the entry is expired regardless of its clock-based
//! rules and leaves the cache with [`EvictionReason::SignalFired`].
//!
//! Signals come in two flavors.  Poll-only signals are observed on reads
//! and on expiration sweeps.  Hook-capable signals additionally accept a
//! removal hook from the cache, so firing evicts the subscribed entry
//! immediately instead of waiting for the next scan.
//!
//! [`EvictionReason::SignalFired`]: crate::EvictionReason::SignalFired
//!
//! # Example
//! ```
//! use cortado::signal::ManualSignal;
//! use cortado::{Cache, EntryOptions};
//! use std::sync::Arc;
//!
//! let cache: Cache<String, String> = Cache::builder().build();
//! let signal = Arc::new(ManualSignal::new());
//!
//! cache
//!     .insert_with(
//!         "config".to_string(),
//!         "v1".to_string(),
//!         EntryOptions::new().signal(signal.clone()),
//!     )
//!     .unwrap();
//!
//! signal.fire();
//! assert!(cache.get(&"config".to_string()).is_none());
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A capability an entry subscribes to that can mark it invalid outside
/// the normal expiration clock.
pub trait ChangeSignal: Send + Sync + 'static {
    /// Returns `true` once the underlying source has changed.
    ///
    /// Must be monotonic: once fired, always fired.
    fn has_fired(&self) -> bool;

    /// Registers a hook to run when the signal fires.
    ///
    /// Returns `true` if the hook was accepted (or executed immediately
    /// because the signal had already fired).  Poll-only implementations
    /// return `false` and drop the hook; the cache then relies on
    /// [`has_fired`](ChangeSignal::has_fired) polling alone.
    fn on_fire(&self, hook: Box<dyn FnOnce() + Send>) -> bool {
        let _ = hook;
        false
    }
}

/// A hook-capable signal fired explicitly by the caller.
///
/// The workhorse for tests and for wiring ad-hoc invalidation (file
/// watchers, config reloads) into the cache.
pub struct ManualSignal {
    fired: AtomicBool,
    hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ManualSignal {
    pub fn new() -> Self {
        ManualSignal {
            fired: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Fires the signal, running every registered hook exactly once.
    ///
    /// Subsequent calls are no-ops.
    pub fn fire(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }
    }
}

impl Default for ManualSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSignal for ManualSignal {
    fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    fn on_fire(&self, hook: Box<dyn FnOnce() + Send>) -> bool {
        // Late registration on an already-fired signal runs immediately, so
        // the subscriber cannot miss the transition.
        if self.has_fired() {
            hook();
            return true;
        }
        let mut hooks = self.hooks.lock();
        if self.has_fired() {
            drop(hooks);
            hook();
        } else {
            hooks.push(hook);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn hooks_run_once_on_fire() {
        let signal = ManualSignal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        assert!(signal.on_fire(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));

        signal.fire();
        signal.fire();
        assert!(signal.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_hook_runs_immediately() {
        let signal = ManualSignal::new();
        signal.fire();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        signal.on_fire(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
