//! Raw per-outcome counters with lock-free observer fan-out
//!
//! `OperationCounter` is the single hot-path write surface: business code
//! calls [`OperationCounter::end`] on every operation. The end path is one
//! relaxed `fetch_add` plus iteration over an atomically loaded observer
//! snapshot. Attaching or detaching an observer publishes a fresh snapshot;
//! it never blocks, and is never blocked by, an in-flight `end` call.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

use crate::outcome::{Outcome, OutcomeSet};

/// A derived observer notified on every operation start/end.
///
/// `begin` and `end_with` have default implementations so observers that
/// only count finished outcomes (the common case) implement `end` alone.
pub trait OperationObserver<T: Outcome>: Send + Sync {
    /// An operation has started. Used by in-flight/latency observers.
    fn begin(&self) {}

    /// An operation finished with `outcome`.
    fn end(&self, outcome: T);

    /// An operation finished with `outcome` and a numeric parameter
    /// (a size, a duration in microseconds, ...). Defaults to ignoring the
    /// parameter.
    fn end_with(&self, outcome: T, _parameter: u64) {
        self.end(outcome);
    }
}

type ObserverSet<T> = Vec<Arc<dyn OperationObserver<T>>>;

/// Per-outcome monotonic tallies for one instrumented operation.
///
/// Identified by `(name, outcome kind)` plus a tag set used by discovery.
/// Tallies are never decremented and never reset; the counter lives as long
/// as the instrumented object.
pub struct OperationCounter<T: Outcome> {
    name: String,
    tags: HashSet<String>,
    counts: Vec<AtomicU64>,
    observers: ArcSwap<ObserverSet<T>>,
}

impl<T: Outcome> OperationCounter<T> {
    /// Create a counter with one zeroed tally per outcome category.
    #[must_use]
    pub fn new(name: impl Into<String>, tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            tags: tags.into_iter().collect(),
            counts: T::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
            observers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Name declared at the instrumentation point, matched by discovery.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags declared at the instrumentation point, matched by discovery.
    #[must_use]
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Exact tally for one category.
    ///
    /// Monotonically non-decreasing; a concurrent increment may or may not
    /// be visible to a given call but is never lost.
    #[inline]
    #[must_use]
    pub fn count(&self, outcome: T) -> u64 {
        self.counts[outcome.index()].load(Ordering::Relaxed)
    }

    /// Sum of tallies over a subset of categories.
    #[must_use]
    pub fn count_set(&self, set: OutcomeSet<T>) -> u64 {
        set.iter().map(|c| self.count(c)).sum()
    }

    /// Notify observers that an operation has started. Nothing is counted.
    #[inline]
    pub fn begin(&self) {
        for observer in self.observers.load().iter() {
            observer.begin();
        }
    }

    /// Record a finished operation: increment the tally for `outcome`, then
    /// fan the event out to the current observer snapshot.
    #[inline]
    pub fn end(&self, outcome: T) {
        self.counts[outcome.index()].fetch_add(1, Ordering::Relaxed);
        for observer in self.observers.load().iter() {
            observer.end(outcome);
        }
    }

    /// Like [`end`](Self::end), additionally passing a numeric parameter to
    /// observers that care about it.
    #[inline]
    pub fn end_with(&self, outcome: T, parameter: u64) {
        self.counts[outcome.index()].fetch_add(1, Ordering::Relaxed);
        for observer in self.observers.load().iter() {
            observer.end_with(outcome, parameter);
        }
    }

    /// Attach a derived observer. Publishes a new snapshot; events already
    /// in flight keep iterating the old one.
    pub fn add_derived(&self, observer: Arc<dyn OperationObserver<T>>) {
        self.observers.rcu(|current| {
            let mut next: ObserverSet<T> = (**current).clone();
            next.push(Arc::clone(&observer));
            next
        });
    }

    /// Detach a previously attached observer, matched by pointer identity.
    /// Detaching an observer that is not attached is a no-op.
    pub fn remove_derived(&self, observer: &Arc<dyn OperationObserver<T>>) {
        self.observers.rcu(|current| {
            current
                .iter()
                .filter(|o| !Arc::ptr_eq(o, observer))
                .cloned()
                .collect::<ObserverSet<T>>()
        });
    }

    /// Number of currently attached observers.
    #[must_use]
    pub fn derived_len(&self) -> usize {
        self.observers.load().len()
    }
}

impl<T: Outcome> fmt::Display for OperationCounter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for &category in T::ALL {
            map.entry(&category, &self.count(category));
        }
        map.finish()
    }
}

impl<T: Outcome> fmt::Debug for OperationCounter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCounter")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("observers", &self.derived_len())
            .finish()
    }
}
