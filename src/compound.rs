//! Compound operations: per-category singletons plus lazy compound and
//! ratio caches
//!
//! One `CompoundOperation` wraps one raw counter. The per-category
//! statistics are built eagerly and never evicted; arbitrary-subset
//! compounds and rate ratios are built lazily on first access with an
//! insert-if-absent discipline (construct outside any lock, losers of the
//! install race are discarded) and evicted again by the idle-expiry sweep.
//! `NullCompoundOperation` stands in for optional operation kinds with no
//! backing counter; all of its derived values read as zero or absent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::counter::OperationCounter;
use crate::derived::{RatioStatistic, ResultStatistic, ResultView, SampledView};
use crate::history::Sample;
use crate::outcome::{Outcome, OutcomeSet};
use crate::scheduler::Scheduler;

/// Kind-erased control surface shared by real and stand-in operations; what
/// the registry's sweep and global toggles drive.
pub trait OperationControl: Send + Sync {
    /// Suspend (`true`) or resume (`false`) idle-expiry for this operation.
    /// Enabling also activates every currently cached statistic.
    fn set_always_on(&self, enable: bool);

    /// Whether idle-expiry is currently suspended.
    fn is_always_on(&self) -> bool;

    /// Propagate a new rate window to every cached statistic.
    fn set_window(&self, window: Duration);

    /// Propagate a new history configuration to every cached statistic.
    fn set_history(&self, size: usize, interval: Duration);

    /// Expire idle children. Returns true only when the operation is fully
    /// quiesced: every singleton dormant and both caches empty.
    fn expire(&self, threshold: u64) -> bool;

    /// Whether this is the absent-optional stand-in.
    fn is_placeholder(&self) -> bool {
        false
    }
}

/// Typed statistics surface of one operation kind.
pub trait OperationStats<T: Outcome>: OperationControl {
    /// The singleton statistic for exactly one category. Never allocates.
    fn component(&self, category: T) -> Arc<dyn ResultView>;

    /// The statistic for an arbitrary subset of categories. Singleton
    /// subsets are the corresponding component; other subsets are cached
    /// under their canonical key.
    fn compound(&self, set: OutcomeSet<T>) -> Arc<dyn ResultView>;

    /// The sampled quotient of two compound rates, cached under the
    /// ordered pair of canonical keys.
    fn ratio_of(&self, numerator: OutcomeSet<T>, denominator: OutcomeSet<T>)
    -> Arc<dyn SampledView>;

    /// A raw-tally view bypassing windows entirely.
    fn as_count_operation(&self) -> CountOperation<T>;
}

/// Raw-count view over the backing counter. For the absent stand-in every
/// count reads zero.
#[derive(Clone)]
pub struct CountOperation<T: Outcome> {
    source: Option<Arc<OperationCounter<T>>>,
}

impl<T: Outcome> CountOperation<T> {
    /// Tally for one category.
    #[must_use]
    pub fn count(&self, category: T) -> u64 {
        self.source.as_ref().map_or(0, |s| s.count(category))
    }

    /// Sum of tallies over a subset.
    #[must_use]
    pub fn count_set(&self, set: OutcomeSet<T>) -> u64 {
        self.source.as_ref().map_or(0, |s| s.count_set(set))
    }

    /// Sum of tallies over every category.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.count_set(OutcomeSet::all())
    }
}

/// Erased read surface of a count view, for registration handles.
pub trait CountView: Send + Sync {
    /// Sum of tallies over every category.
    fn total(&self) -> u64;

    /// Tally for the category with the given dense index, zero when out of
    /// range.
    fn count_index(&self, index: usize) -> u64;
}

impl<T: Outcome> CountView for CountOperation<T> {
    fn total(&self) -> u64 {
        CountOperation::total(self)
    }

    fn count_index(&self, index: usize) -> u64 {
        T::ALL.get(index).map_or(0, |&category| self.count(category))
    }
}

/// Shared mutable statistic settings, applied to statistics built later.
#[derive(Debug)]
pub(crate) struct StatisticSettings {
    pub(crate) window_nanos: AtomicU64,
    pub(crate) history_size: AtomicUsize,
    pub(crate) history_interval_nanos: AtomicU64,
}

impl StatisticSettings {
    pub(crate) fn new(window: Duration, history_size: usize, history_interval: Duration) -> Self {
        Self {
            window_nanos: AtomicU64::new(window.as_nanos() as u64),
            history_size: AtomicUsize::new(history_size),
            history_interval_nanos: AtomicU64::new(history_interval.as_nanos() as u64),
        }
    }

    pub(crate) fn window(&self) -> Duration {
        Duration::from_nanos(self.window_nanos.load(Ordering::Relaxed))
    }

    pub(crate) fn history_size(&self) -> usize {
        self.history_size.load(Ordering::Relaxed)
    }

    pub(crate) fn history_interval(&self) -> Duration {
        Duration::from_nanos(self.history_interval_nanos.load(Ordering::Relaxed))
    }

    /// An independent copy of the current values. Operations snapshot the
    /// registry-wide settings at bind time; later per-operation changes
    /// stay scoped to that copy.
    pub(crate) fn snapshot(&self) -> Self {
        Self::new(self.window(), self.history_size(), self.history_interval())
    }
}

/// Statistics for one operation kind backed by a live counter.
pub struct CompoundOperation<T: Outcome> {
    source: Arc<OperationCounter<T>>,
    /// One eager singleton per category, indexed by the dense category
    /// index. Fixed after construction.
    components: Vec<Arc<ResultStatistic<T>>>,
    compounds: DashMap<OutcomeSet<T>, Arc<ResultStatistic<T>>>,
    ratios: DashMap<(OutcomeSet<T>, OutcomeSet<T>), Arc<RatioStatistic>>,
    /// This operation's own effective settings, snapshotted from the
    /// registry-wide values at bind time. Per-operation setters mutate
    /// only this copy; registry-level setters propagate into it.
    settings: StatisticSettings,
    always_on: AtomicBool,
    scheduler: Scheduler,
}

impl<T: Outcome> CompoundOperation<T> {
    pub(crate) fn new(
        source: Arc<OperationCounter<T>>,
        shared: Arc<StatisticSettings>,
        scheduler: Scheduler,
    ) -> Self {
        let settings = shared.snapshot();
        let components = T::ALL
            .iter()
            .map(|&category| {
                Arc::new(ResultStatistic::new(
                    Arc::clone(&source),
                    OutcomeSet::singleton(category),
                    settings.window(),
                    settings.history_size(),
                    settings.history_interval(),
                    scheduler.clone(),
                ))
            })
            .collect();
        Self {
            source,
            components,
            compounds: DashMap::new(),
            ratios: DashMap::new(),
            settings,
            always_on: AtomicBool::new(false),
            scheduler,
        }
    }

    /// The backing counter.
    #[must_use]
    pub fn source(&self) -> &Arc<OperationCounter<T>> {
        &self.source
    }

    fn typed_component(&self, category: T) -> &Arc<ResultStatistic<T>> {
        &self.components[category.index()]
    }

    fn build_result(&self, targets: OutcomeSet<T>) -> Arc<ResultStatistic<T>> {
        Arc::new(ResultStatistic::new(
            Arc::clone(&self.source),
            targets,
            self.settings.window(),
            self.settings.history_size(),
            self.settings.history_interval(),
            self.scheduler.clone(),
        ))
    }

    fn typed_compound(&self, set: OutcomeSet<T>) -> Arc<ResultStatistic<T>> {
        if let Some(single) = set.as_singleton() {
            return Arc::clone(self.typed_component(single));
        }
        if let Some(existing) = self.compounds.get(&set) {
            return Arc::clone(existing.value());
        }
        // Construct outside the map lock; on a lost install race the
        // candidate is discarded and the winner returned.
        let candidate = self.build_result(set);
        let entry = self
            .compounds
            .entry(set)
            .or_insert_with(|| {
                trace!(targets = ?set, "compound statistic installed");
                candidate
            });
        Arc::clone(entry.value())
    }
}

impl<T: Outcome> OperationStats<T> for CompoundOperation<T> {
    fn component(&self, category: T) -> Arc<dyn ResultView> {
        Arc::clone(self.typed_component(category)) as Arc<dyn ResultView>
    }

    fn compound(&self, set: OutcomeSet<T>) -> Arc<dyn ResultView> {
        self.typed_compound(set) as Arc<dyn ResultView>
    }

    fn ratio_of(
        &self,
        numerator: OutcomeSet<T>,
        denominator: OutcomeSet<T>,
    ) -> Arc<dyn SampledView> {
        let key = (numerator, denominator);
        if let Some(existing) = self.ratios.get(&key) {
            return Arc::clone(existing.value()) as Arc<dyn SampledView>;
        }
        let n = self.typed_compound(numerator);
        let d = self.typed_compound(denominator);
        let candidate = Arc::new(RatioStatistic::new(
            Arc::new(move || n.rate() / d.rate()),
            self.settings.history_size(),
            self.settings.history_interval(),
            self.scheduler.clone(),
        ));
        let entry = self.ratios.entry(key).or_insert_with(|| {
            trace!(numerator = ?numerator, denominator = ?denominator, "ratio statistic installed");
            candidate
        });
        Arc::clone(entry.value()) as Arc<dyn SampledView>
    }

    fn as_count_operation(&self) -> CountOperation<T> {
        CountOperation {
            source: Some(Arc::clone(&self.source)),
        }
    }
}

impl<T: Outcome> OperationControl for CompoundOperation<T> {
    fn set_always_on(&self, enable: bool) {
        self.always_on.store(enable, Ordering::Relaxed);
        if enable {
            for component in &self.components {
                component.start();
            }
            for entry in self.compounds.iter() {
                entry.value().start();
            }
            for entry in self.ratios.iter() {
                entry.value().start();
            }
        }
    }

    fn is_always_on(&self) -> bool {
        self.always_on.load(Ordering::Relaxed)
    }

    fn set_window(&self, window: Duration) {
        self.settings
            .window_nanos
            .store(window.as_nanos() as u64, Ordering::Relaxed);
        for component in &self.components {
            component.set_window(window);
        }
        for entry in self.compounds.iter() {
            entry.value().set_window(window);
        }
        // Ratios derive their value from compound rates and carry only a
        // history configuration of their own.
    }

    fn set_history(&self, size: usize, interval: Duration) {
        self.settings.history_size.store(size, Ordering::Relaxed);
        self.settings
            .history_interval_nanos
            .store(interval.as_nanos() as u64, Ordering::Relaxed);
        for component in &self.components {
            component.set_history(size, interval);
        }
        for entry in self.compounds.iter() {
            entry.value().set_history(size, interval);
        }
        for entry in self.ratios.iter() {
            entry.value().set_history(size, interval);
        }
    }

    fn expire(&self, threshold: u64) -> bool {
        if self.is_always_on() {
            return false;
        }
        let mut expired = true;
        for component in &self.components {
            expired &= component.expire(threshold);
        }
        self.compounds.retain(|_, stat| !stat.expire(threshold));
        self.ratios.retain(|_, stat| !stat.expire(threshold));
        let quiesced = expired && self.compounds.is_empty() && self.ratios.is_empty();
        if quiesced {
            debug!(counter = self.source.name(), "operation fully quiesced");
        }
        quiesced
    }
}

/// Stand-in for an optional operation kind with no backing counter. Every
/// derived value reads as zero or absent; callers never special-case it.
pub struct NullCompoundOperation<T: Outcome> {
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: Outcome> NullCompoundOperation<T> {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

struct NullResult;

impl ResultView for NullResult {
    fn rate(&self) -> f64 {
        0.0
    }

    fn count(&self) -> u64 {
        0
    }

    fn history(&self) -> Vec<Sample> {
        Vec::new()
    }

    fn start(&self) {}
}

struct NullSampled;

impl SampledView for NullSampled {
    fn value(&self) -> f64 {
        0.0
    }

    fn history(&self) -> Vec<Sample> {
        Vec::new()
    }

    fn start(&self) {}
}

impl<T: Outcome> OperationStats<T> for NullCompoundOperation<T> {
    fn component(&self, _category: T) -> Arc<dyn ResultView> {
        Arc::new(NullResult)
    }

    fn compound(&self, _set: OutcomeSet<T>) -> Arc<dyn ResultView> {
        Arc::new(NullResult)
    }

    fn ratio_of(
        &self,
        _numerator: OutcomeSet<T>,
        _denominator: OutcomeSet<T>,
    ) -> Arc<dyn SampledView> {
        Arc::new(NullSampled)
    }

    fn as_count_operation(&self) -> CountOperation<T> {
        CountOperation { source: None }
    }
}

impl<T: Outcome> OperationControl for NullCompoundOperation<T> {
    fn set_always_on(&self, _enable: bool) {}

    fn is_always_on(&self) -> bool {
        false
    }

    fn set_window(&self, _window: Duration) {}

    fn set_history(&self, _size: usize, _interval: Duration) {}

    fn expire(&self, _threshold: u64) -> bool {
        false
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}
