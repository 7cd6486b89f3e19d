//! Tests for counter.rs: exact tallies and concurrent fan-out
//!
//! Covers the hot-path contract: no increment is ever lost or duplicated,
//! and observer attach/detach is safe concurrently with `end` calls.


use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use opstats::{OperationCounter, OperationObserver, OutcomeSet};
use test_helpers::CacheOutcome;

#[test]
fn concurrent_increments_are_exact() {
    let counter = Arc::new(OperationCounter::<CacheOutcome>::new("get", []));
    let threads = 8;
    let per_thread = 10_000;

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for n in 0..per_thread {
                    if (n + i) % 3 == 0 {
                        counter.end(CacheOutcome::Miss);
                    } else {
                        counter.end(CacheOutcome::Hit);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = counter.count(CacheOutcome::Hit) + counter.count(CacheOutcome::Miss);
    assert_eq!(total, (threads * per_thread) as u64);
    assert_eq!(counter.count(CacheOutcome::Failure), 0);
}

struct CountingObserver {
    seen: AtomicU64,
}

impl OperationObserver<CacheOutcome> for CountingObserver {
    fn end(&self, _outcome: CacheOutcome) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn fan_out_is_safe_under_concurrent_attach_detach() {
    let counter = Arc::new(OperationCounter::<CacheOutcome>::new("get", []));
    let stop = Arc::new(AtomicU64::new(0));

    let churner = {
        let counter = Arc::clone(&counter);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while stop.load(Ordering::Relaxed) == 0 {
                let observer: Arc<dyn OperationObserver<CacheOutcome>> =
                    Arc::new(CountingObserver {
                        seen: AtomicU64::new(0),
                    });
                counter.add_derived(Arc::clone(&observer));
                counter.remove_derived(&observer);
            }
        })
    };

    for _ in 0..50_000 {
        counter.end(CacheOutcome::Hit);
    }
    stop.store(1, Ordering::Relaxed);
    churner.join().unwrap();

    assert_eq!(counter.count(CacheOutcome::Hit), 50_000);
    assert_eq!(counter.derived_len(), 0);
}

#[test]
fn attached_observer_sees_every_subsequent_event() {
    let counter = OperationCounter::<CacheOutcome>::new("get", []);
    let observer = Arc::new(CountingObserver {
        seen: AtomicU64::new(0),
    });
    counter.add_derived(observer.clone());

    test_helpers::drive(
        &counter,
        &[(CacheOutcome::Hit, 7), (CacheOutcome::Miss, 3)],
    );
    assert_eq!(observer.seen.load(Ordering::Relaxed), 10);
}

#[test]
fn count_set_sums_categories() {
    let counter = OperationCounter::<CacheOutcome>::new("get", []);
    test_helpers::drive(
        &counter,
        &[
            (CacheOutcome::Hit, 4),
            (CacheOutcome::Miss, 2),
            (CacheOutcome::Failure, 1),
        ],
    );
    let found = OutcomeSet::of([CacheOutcome::Hit, CacheOutcome::Miss]);
    assert_eq!(counter.count_set(found), 6);
    assert_eq!(counter.count_set(OutcomeSet::all()), 7);
    assert_eq!(counter.count_set(OutcomeSet::empty()), 0);
}

#[test]
fn display_renders_per_category_tallies() {
    let counter = OperationCounter::<CacheOutcome>::new("get", []);
    counter.end(CacheOutcome::Hit);
    let rendered = format!("{counter}");
    assert!(rendered.contains("Hit"), "rendered: {rendered}");
    assert!(rendered.contains('1'), "rendered: {rendered}");
}
