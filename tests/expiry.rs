//! Absolute, sliding, and signal-driven expiration, plus sweep scheduling.

use cortado::clock::ManualClock;
use cortado::dispatch::InlineDispatcher;
use cortado::signal::{ChangeSignal, ManualSignal};
use cortado::{Cache, EntryOptions, EvictionReason};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type EventLog = Arc<Mutex<Vec<(String, EvictionReason)>>>;

/// Deterministic cache: manual clock, inline dispatch, sweep on every
/// mutating call.
fn make_cache(clock: &Arc<ManualClock>) -> Cache<String, String> {
    Cache::builder()
        .clock(clock.clone())
        .dispatcher(Arc::new(InlineDispatcher))
        .scan_frequency(Duration::ZERO)
        .build()
}

fn logging(log: &EventLog) -> EntryOptions<String, String> {
    let log = Arc::clone(log);
    EntryOptions::new().on_evict(move |key: &String, _value, reason| {
        log.lock().unwrap().push((key.clone(), reason));
    })
}

/// A signal without hook support: observed only by reads and sweeps.
struct PollSignal(AtomicBool);

impl PollSignal {
    fn new() -> Self {
        PollSignal(AtomicBool::new(false))
    }

    fn fire(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl ChangeSignal for PollSignal {
    fn has_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Absolute expiration
// ---------------------------------------------------------------------------

#[test]
fn entry_expires_at_its_absolute_deadline() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    cache
        .insert_with(
            "k".to_string(),
            "v".to_string(),
            logging(&log).expires_after(Duration::from_secs(60)),
        )
        .unwrap();

    clock.advance(Duration::from_secs(30));
    assert!(cache.get(&"k".to_string()).is_some(), "half-way: still alive");

    clock.advance(Duration::from_secs(31));
    assert_eq!(cache.get(&"k".to_string()), None, "past the deadline");
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[("k".to_string(), EvictionReason::Expired)]
    );
    assert_eq!(cache.stats().expirations, 1);
}

#[test]
fn entry_already_expired_at_commit_is_never_stored() {
    let clock = Arc::new(ManualClock::new());
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let cache: Cache<String, String> = Cache::builder()
        .size_limit(100)
        .clock(clock.clone())
        .dispatcher(Arc::new(InlineDispatcher))
        .build();

    cache
        .insert_with(
            "k".to_string(),
            "v".to_string(),
            logging(&log).size(40).expires_after(Duration::ZERO),
        )
        .unwrap();

    assert_eq!(cache.get(&"k".to_string()), None);
    assert_eq!(cache.entry_count(), 0);
    assert_eq!(cache.size(), 0, "a dead-on-arrival entry is never counted");
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[("k".to_string(), EvictionReason::Expired)]
    );
}

#[test]
fn expired_candidate_still_supersedes_the_old_value() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    cache
        .insert_with("k".to_string(), "old".to_string(), logging(&log))
        .unwrap();
    cache
        .insert_with(
            "k".to_string(),
            "dead".to_string(),
            EntryOptions::new().expires_after(Duration::ZERO),
        )
        .unwrap();

    assert_eq!(cache.get(&"k".to_string()), None, "key absent, not reverted");
    assert!(log
        .lock()
        .unwrap()
        .contains(&("k".to_string(), EvictionReason::Replaced)));
}

// ---------------------------------------------------------------------------
// Sliding expiration
// ---------------------------------------------------------------------------

#[test]
fn sliding_window_resets_on_every_read() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);

    cache
        .insert_with(
            "k".to_string(),
            "v".to_string(),
            EntryOptions::new().sliding(Duration::from_secs(60)),
        )
        .unwrap();

    for _ in 0..3 {
        clock.advance(Duration::from_secs(45));
        assert!(
            cache.get(&"k".to_string()).is_some(),
            "each read restarts the idle window"
        );
    }

    clock.advance(Duration::from_secs(61));
    assert_eq!(cache.get(&"k".to_string()), None, "idle past the window");
}

// ---------------------------------------------------------------------------
// Change signals
// ---------------------------------------------------------------------------

#[test]
fn polled_signal_expires_on_read() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let signal = Arc::new(PollSignal::new());

    cache
        .insert_with(
            "k".to_string(),
            "v".to_string(),
            logging(&log).signal(Arc::clone(&signal) as Arc<dyn ChangeSignal>),
        )
        .unwrap();

    assert!(cache.get(&"k".to_string()).is_some());
    signal.fire();
    // No hook support: the entry sits in the store until observed.
    assert!(cache.contains(&"k".to_string()));
    assert_eq!(cache.get(&"k".to_string()), None);
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[("k".to_string(), EvictionReason::SignalFired)]
    );
}

#[test]
fn hooked_signal_removes_without_a_read() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let signal = Arc::new(ManualSignal::new());

    cache
        .insert_with(
            "k".to_string(),
            "v".to_string(),
            logging(&log).signal(Arc::clone(&signal) as Arc<dyn ChangeSignal>),
        )
        .unwrap();

    signal.fire();

    assert_eq!(cache.entry_count(), 0, "hook fired a store-side removal");
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[("k".to_string(), EvictionReason::SignalFired)]
    );
}

#[test]
fn already_fired_signal_rejects_the_insert() {
    let clock = Arc::new(ManualClock::new());
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let cache: Cache<String, String> = Cache::builder()
        .size_limit(100)
        .clock(clock.clone())
        .dispatcher(Arc::new(InlineDispatcher))
        .build();
    let signal = Arc::new(ManualSignal::new());
    signal.fire();

    cache
        .insert_with(
            "k".to_string(),
            "v".to_string(),
            logging(&log)
                .size(10)
                .signal(Arc::clone(&signal) as Arc<dyn ChangeSignal>),
        )
        .unwrap();

    assert_eq!(cache.entry_count(), 0);
    assert_eq!(cache.size(), 0);
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[("k".to_string(), EvictionReason::SignalFired)]
    );
}

// ---------------------------------------------------------------------------
// Opportunistic sweeps
// ---------------------------------------------------------------------------

#[test]
fn mutating_calls_sweep_expired_entries_when_due() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock); // zero frequency: sweep every time

    cache
        .insert_with(
            "short".to_string(),
            "v".to_string(),
            EntryOptions::new().expires_after(Duration::from_secs(10)),
        )
        .unwrap();
    clock.advance(Duration::from_secs(11));

    // The insert of an unrelated key sweeps the expired one out.
    cache.insert("other".to_string(), "v".to_string()).unwrap();

    assert!(!cache.contains(&"short".to_string()), "swept without a read");
    assert_eq!(cache.entry_count(), 1);
}

#[test]
fn sweeps_are_throttled_by_the_scan_frequency() {
    let clock = Arc::new(ManualClock::new());
    let cache: Cache<String, String> = Cache::builder()
        .clock(clock.clone())
        .dispatcher(Arc::new(InlineDispatcher))
        .scan_frequency(Duration::from_secs(3600))
        .build();

    cache
        .insert_with(
            "short".to_string(),
            "v".to_string(),
            EntryOptions::new().expires_after(Duration::from_secs(10)),
        )
        .unwrap();
    clock.advance(Duration::from_secs(20));

    cache.insert("other".to_string(), "v".to_string()).unwrap();
    assert!(
        cache.contains(&"short".to_string()),
        "not due: the expired entry stays until read or next sweep"
    );

    // Reads still observe expiry inline regardless of the sweep schedule.
    assert_eq!(cache.get(&"short".to_string()), None);
}

// ---------------------------------------------------------------------------
// Parent-linked expiration
// ---------------------------------------------------------------------------

#[test]
fn child_signal_propagates_to_the_parent_entry() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);
    let signal = Arc::new(ManualSignal::new());

    cache.insert("parent".to_string(), "v".to_string()).unwrap();
    cache
        .insert_linked(
            "child".to_string(),
            "v".to_string(),
            EntryOptions::new().signal(Arc::clone(&signal) as Arc<dyn ChangeSignal>),
            &"parent".to_string(),
        )
        .unwrap();

    signal.fire();

    assert_eq!(cache.entry_count(), 0, "child and parent both invalidated");
}

#[test]
fn child_deadline_tightens_the_parent() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);

    cache.insert("parent".to_string(), "v".to_string()).unwrap();
    cache
        .insert_linked(
            "child".to_string(),
            "v".to_string(),
            EntryOptions::new().expires_after(Duration::from_secs(50)),
            &"parent".to_string(),
        )
        .unwrap();

    clock.advance(Duration::from_secs(51));
    assert_eq!(cache.get(&"child".to_string()), None);
    assert_eq!(
        cache.get(&"parent".to_string()),
        None,
        "parent inherits the child's earlier deadline"
    );
}

// ---------------------------------------------------------------------------
// Priority does not shield expiration
// ---------------------------------------------------------------------------

#[test]
fn never_remove_entries_still_expire() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);

    cache
        .insert_with(
            "pinned".to_string(),
            "v".to_string(),
            EntryOptions::new()
                .priority(cortado::Priority::NeverRemove)
                .expires_after(Duration::from_secs(10)),
        )
        .unwrap();

    clock.advance(Duration::from_secs(11));
    assert_eq!(cache.get(&"pinned".to_string()), None);
}

// ---------------------------------------------------------------------------
// Callback isolation
// ---------------------------------------------------------------------------

#[test]
fn panicking_callback_does_not_poison_the_cache_or_other_callbacks() {
    let clock = Arc::new(ManualClock::new());
    let cache = make_cache(&clock);
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);

    cache
        .insert_with(
            "k".to_string(),
            "v".to_string(),
            EntryOptions::new()
                .on_evict(|_key: &String, _value, _reason| panic!("observer bug"))
                .on_evict(move |key: &String, _value, reason| {
                    log2.lock().unwrap().push((key.clone(), reason));
                }),
        )
        .unwrap();

    cache.remove(&"k".to_string());

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[("k".to_string(), EvictionReason::Removed)],
        "the second callback still ran"
    );

    // The cache remains fully usable.
    cache.insert("k2".to_string(), "v".to_string()).unwrap();
    assert!(cache.get(&"k2".to_string()).is_some());
}
