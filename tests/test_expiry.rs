//! Tests for idle-expiry: eviction, always-on, quiescing
//!
//! Expiry is driven directly through `OperationControl::expire` with
//! explicit thresholds so the tests do not depend on sweep timing; the
//! scheduled sweep itself is covered in test_registry.rs.


use std::sync::Arc;
use std::time::Duration;

use opstats::time::now_nanos;
use opstats::{OperationControl, OperationStats, OutcomeSet};
use test_helpers::CacheOutcome;

fn live_operation() -> (
    Arc<opstats::OperationCounter<CacheOutcome>>,
    Arc<dyn OperationStats<CacheOutcome>>,
) {
    let (graph, counter) = test_helpers::graph_with_get_counter();
    let registry = test_helpers::get_registry(graph);
    let operation = registry.operation::<CacheOutcome>("get").unwrap();
    drop(registry);
    (counter, operation)
}

/// A threshold newer than every touch so far: everything idle expires.
fn future_threshold() -> u64 {
    now_nanos() + 1
}

#[tokio::test]
async fn expire_evicts_compounds_and_rebuilds_fresh_ones() {
    let (_counter, operation) = live_operation();
    let key = OutcomeSet::of([CacheOutcome::Hit, CacheOutcome::Miss]);

    let first = operation.compound(key);
    first.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!first.history().is_empty());

    assert!(operation.expire(future_threshold()));

    // The evicted entry is replaced by a brand-new statistic on next
    // access, distinguishable by its empty history.
    let second = operation.compound(key);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.history().is_empty());
}

#[tokio::test]
async fn singletons_are_deactivated_but_never_evicted() {
    let (_counter, operation) = live_operation();

    let hits = operation.component(CacheOutcome::Hit);
    hits.start();
    assert!(operation.expire(future_threshold()));

    let again = operation.component(CacheOutcome::Hit);
    assert!(
        Arc::ptr_eq(&hits, &again),
        "singletons must survive expiry sweeps"
    );
}

#[tokio::test]
async fn always_on_suspends_expiry_entirely() {
    let (_counter, operation) = live_operation();
    let compound = operation.compound(OutcomeSet::of([CacheOutcome::Hit, CacheOutcome::Miss]));

    operation.set_always_on(true);
    assert!(operation.is_always_on());

    // Every cached statistic was activated: sampling fills histories
    // without any further reads.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!compound.history().is_empty());

    assert!(!operation.expire(future_threshold()));
    let same = operation.compound(OutcomeSet::of([CacheOutcome::Miss, CacheOutcome::Hit]));
    assert!(
        Arc::ptr_eq(&compound, &same),
        "nothing may be evicted while always-on"
    );

    // Disabling only clears the mark; the next sweep may expire again.
    operation.set_always_on(false);
    assert!(!operation.is_always_on());
    assert!(operation.expire(future_threshold()));
}

#[tokio::test]
async fn expire_reports_quiesced_only_when_caches_are_empty() {
    let (_counter, operation) = live_operation();

    // Touch a compound, then expire with a threshold older than the touch:
    // the compound survives, so the operation is not quiesced.
    let _ = operation
        .compound(OutcomeSet::of([CacheOutcome::Hit, CacheOutcome::Miss]))
        .rate();
    let stale = now_nanos().saturating_sub(Duration::from_secs(60).as_nanos() as u64);
    assert!(!operation.expire(stale));

    // With a future threshold everything goes dormant and empties.
    assert!(operation.expire(future_threshold()));
    assert!(operation.expire(future_threshold()), "stays quiesced");
}

#[tokio::test]
async fn ratio_expiry_evicts_from_the_ratio_cache() {
    let (counter, operation) = live_operation();
    test_helpers::drive(&counter, &[(CacheOutcome::Hit, 3)]);

    let hit = OutcomeSet::singleton(CacheOutcome::Hit);
    let all = OutcomeSet::all();
    let first = operation.ratio_of(hit, all);
    let _ = first.value();

    assert!(operation.expire(future_threshold()));

    let second = operation.ratio_of(hit, all);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.history().is_empty());
}
