//! Tests for history sampling through real time
//!
//! These run against the live scheduler with short intervals and generous
//! margins; deterministic window arithmetic is covered by unit tests.


use std::sync::Arc;
use std::time::Duration;

use opstats::OperationStats;
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

#[tokio::test]
async fn history_fills_at_the_sampling_interval() {
    let (counter, operation) = live_operation();
    let hits = operation.component(CacheOutcome::Hit);
    hits.start();
    test_helpers::drive(&counter, &[(CacheOutcome::Hit, 5)]);

    // 10ms interval, capacity 8: the ring should fill and then cap.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let history = hits.history();
    assert_eq!(history.len(), 8);

    // Every sample was taken while the events were inside the one-second
    // window, so each carries a positive rate.
    assert!(history.iter().all(|s| s.value > 0.0));

    // Timestamps are non-decreasing, oldest first.
    for pair in history.windows(2) {
        assert!(pair[0].at_millis <= pair[1].at_millis);
    }
}

#[tokio::test]
async fn start_is_idempotent() {
    let (_counter, operation) = live_operation();
    // A roomy ring so duplicated sampling tasks would be visible as extra
    // samples rather than hidden by the capacity cap.
    operation.set_history(64, Duration::from_millis(10));
    let hits = operation.component(CacheOutcome::Hit);
    hits.start();
    hits.start();
    hits.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    // One task at a 10ms interval collects ~10 samples in 100ms; three
    // tasks would collect ~30.
    let len = hits.history().len();
    assert!(len <= 20, "history length {len}");
}

#[tokio::test]
async fn reconfigured_history_keeps_collected_samples() {
    let (_counter, operation) = live_operation();
    let hits = operation.component(CacheOutcome::Hit);
    hits.start();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let collected = hits.history().len();
    assert!(collected >= 2, "collected {collected}");

    // Grow the capacity and slow the interval: nothing is discarded.
    operation.set_history(16, Duration::from_millis(50));
    let after = hits.history().len();
    assert!(after >= collected.min(8));
}
