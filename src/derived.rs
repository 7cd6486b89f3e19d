//! Derived statistics: windowed rates, ratios, and their sampled history
//!
//! A derived statistic owns live state for one subset of outcome categories
//! (or, for ratios, a value function over two rates): the sliding-window
//! rate, a bounded history refreshed by a periodic sampling task, and the
//! activation bookkeeping that lets idle statistics be expired. Reading any
//! derived value touches the statistic and activates it; the registry's
//! periodic sweep deactivates statistics untouched past the threshold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::counter::{OperationCounter, OperationObserver};
use crate::history::{Sample, SampleHistory};
use crate::outcome::{Outcome, OutcomeSet};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::time::now_nanos;
use crate::window::WindowedRate;

/// Read surface of a per-result or compound statistic, object-safe so
/// registrations and the absent-optional stand-in share it.
pub trait ResultView: Send + Sync {
    /// Events per second over the trailing window.
    fn rate(&self) -> f64;

    /// Live sum of raw tallies over the covered categories.
    fn count(&self) -> u64;

    /// Snapshot of the sampled history, oldest first.
    fn history(&self) -> Vec<Sample>;

    /// Activate periodic sampling. Idempotent.
    fn start(&self);
}

/// Read surface of a standalone sampled value such as a ratio.
pub trait SampledView: Send + Sync {
    /// The current value. For ratios this is the IEEE quotient of the two
    /// rates; a zero denominator yields infinity or NaN, never an error.
    fn value(&self) -> f64;

    /// Snapshot of the sampled history, oldest first.
    fn history(&self) -> Vec<Sample>;

    /// Activate periodic sampling. Idempotent.
    fn start(&self);
}

/// Periodic sampling plus touch/expiry state shared by every derived
/// statistic. At most one sampling task exists at any time; all task
/// transitions happen under the one task mutex.
struct Sampler {
    scheduler: Scheduler,
    history: Arc<SampleHistory>,
    sample: Arc<dyn Fn() -> f64 + Send + Sync>,
    interval: Mutex<Duration>,
    task: Mutex<Option<TaskHandle>>,
    last_touch: AtomicU64,
}

impl Sampler {
    fn new(
        scheduler: Scheduler,
        history_size: usize,
        interval: Duration,
        sample: Arc<dyn Fn() -> f64 + Send + Sync>,
    ) -> Self {
        Self {
            scheduler,
            history: Arc::new(SampleHistory::new(history_size)),
            sample,
            interval: Mutex::new(interval),
            task: Mutex::new(None),
            last_touch: AtomicU64::new(now_nanos()),
        }
    }

    fn touch(&self) {
        self.last_touch.store(now_nanos(), Ordering::Relaxed);
    }

    /// Schedule the sampling task if dormant. Returns true when this call
    /// performed the activation.
    fn start(&self) -> bool {
        self.start_with(|| ())
    }

    /// Like [`start`](Self::start), running `on_activate` under the task
    /// mutex so companion state (the counter observer) transitions
    /// atomically with the task.
    fn start_with(&self, on_activate: impl FnOnce()) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return false;
        }
        let interval = *self.interval.lock().unwrap_or_else(|e| e.into_inner());
        *task = Some(self.schedule(interval));
        on_activate();
        true
    }

    fn schedule(&self, interval: Duration) -> TaskHandle {
        let history = Arc::clone(&self.history);
        let sample = Arc::clone(&self.sample);
        self.scheduler
            .run_at_fixed_rate(interval, interval, move || history.record(sample()))
    }

    fn is_active(&self) -> bool {
        self.task.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Apply a new history configuration. An active sampler is cancelled
    /// and resubmitted at the new interval; collected samples are kept.
    fn set_history(&self, size: usize, interval: Duration) {
        self.history.set_capacity(size);
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *self.interval.lock().unwrap_or_else(|e| e.into_inner()) = interval;
        if task.is_some() {
            // Dropping the old handle cancels it.
            *task = Some(self.schedule(interval));
        }
    }

    /// Deactivate if untouched since `threshold`. Returns true when the
    /// statistic ends up dormant (including when it already was), false
    /// when it stays active.
    fn expire(&self, threshold: u64) -> bool {
        self.expire_with(threshold, || ())
    }

    /// Like [`expire`](Self::expire), running `on_deactivate` under the
    /// task mutex when this call performs the deactivation. A statistic
    /// that was already dormant has no companion state to tear down.
    fn expire_with(&self, threshold: u64, on_deactivate: impl FnOnce()) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        match *task {
            None => true,
            Some(_) if self.last_touch.load(Ordering::Relaxed) >= threshold => false,
            Some(_) => {
                *task = None;
                on_deactivate();
                true
            }
        }
    }
}

/// Observer fed by the raw counter's fan-out; records matching events into
/// the sliding window.
struct RateObserver<T: Outcome> {
    targets: OutcomeSet<T>,
    rate: Arc<WindowedRate>,
}

impl<T: Outcome> OperationObserver<T> for RateObserver<T> {
    #[inline]
    fn end(&self, outcome: T) {
        if self.targets.contains(outcome) {
            self.rate.record(1);
        }
    }
}

/// Windowed rate, live count, and sampled rate history over one subset of
/// outcome categories.
///
/// Singleton instances (one category) are created eagerly per compound
/// operation and live forever; multi-category instances are created lazily
/// and evicted when idle.
pub struct ResultStatistic<T: Outcome> {
    source: Arc<OperationCounter<T>>,
    targets: OutcomeSet<T>,
    rate: Arc<WindowedRate>,
    observer: Arc<dyn OperationObserver<T>>,
    sampler: Sampler,
}

impl<T: Outcome> ResultStatistic<T> {
    pub(crate) fn new(
        source: Arc<OperationCounter<T>>,
        targets: OutcomeSet<T>,
        window: Duration,
        history_size: usize,
        history_interval: Duration,
        scheduler: Scheduler,
    ) -> Self {
        let rate = Arc::new(WindowedRate::new(window));
        let observer: Arc<dyn OperationObserver<T>> = Arc::new(RateObserver {
            targets,
            rate: Arc::clone(&rate),
        });
        let sampled = Arc::clone(&rate);
        let sample: Arc<dyn Fn() -> f64 + Send + Sync> = Arc::new(move || sampled.rate());
        Self {
            source,
            targets,
            rate,
            observer,
            sampler: Sampler::new(scheduler, history_size, history_interval, sample),
        }
    }

    /// The categories this statistic covers.
    #[must_use]
    pub fn targets(&self) -> OutcomeSet<T> {
        self.targets
    }

    /// Events per second over the trailing window. Touches the statistic.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.activate();
        self.rate.rate()
    }

    /// Sum of raw tallies over the covered categories, read live from the
    /// counter, bypassing the window. Touches the statistic.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.activate();
        self.source.count_set(self.targets)
    }

    /// Snapshot of the sampled rate history. Touches the statistic.
    #[must_use]
    pub fn history(&self) -> Vec<Sample> {
        self.activate();
        self.sampler.history.snapshot()
    }

    /// Activate sampling and window accumulation. Idempotent. The observer
    /// attaches under the sampler's task mutex, so membership always
    /// matches the task state even against a concurrent expiry.
    pub fn start(&self) {
        let attached = self
            .sampler
            .start_with(|| self.source.add_derived(Arc::clone(&self.observer)));
        if attached {
            debug!(targets = ?self.targets, counter = self.source.name(), "result statistic activated");
        }
    }

    fn activate(&self) {
        self.sampler.touch();
        self.start();
    }

    /// Whether the sampling task is currently scheduled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.sampler.is_active()
    }

    /// Replace the rate window. Affects future reads only.
    pub fn set_window(&self, window: Duration) {
        self.rate.set_window(window);
    }

    /// Replace the history capacity and sampling interval. Collected
    /// samples are kept.
    pub fn set_history(&self, size: usize, interval: Duration) {
        self.sampler.set_history(size, interval);
    }

    /// Deactivate if untouched since `threshold` (clock nanoseconds).
    /// Returns true when the statistic ends up dormant. Safe to call
    /// concurrently with readers; a concurrent read simply reactivates.
    /// The observer detaches under the same task mutex that guards
    /// activation, so a racing `start` can never leave a dormant statistic
    /// with an attached observer or attach a second copy.
    pub fn expire(&self, threshold: u64) -> bool {
        self.sampler
            .expire_with(threshold, || self.source.remove_derived(&self.observer))
    }
}

impl<T: Outcome> ResultView for ResultStatistic<T> {
    fn rate(&self) -> f64 {
        ResultStatistic::rate(self)
    }

    fn count(&self) -> u64 {
        ResultStatistic::count(self)
    }

    fn history(&self) -> Vec<Sample> {
        ResultStatistic::history(self)
    }

    fn start(&self) {
        ResultStatistic::start(self);
    }
}

/// A sampled standalone value: the quotient of two compound rates.
///
/// The value function reads the component rates through their public
/// accessors, so an active ratio keeps its components touched and alive;
/// once the ratio itself goes idle and expires, the components expire on a
/// following sweep.
pub struct RatioStatistic {
    value: Arc<dyn Fn() -> f64 + Send + Sync>,
    sampler: Sampler,
}

impl RatioStatistic {
    pub(crate) fn new(
        value: Arc<dyn Fn() -> f64 + Send + Sync>,
        history_size: usize,
        history_interval: Duration,
        scheduler: Scheduler,
    ) -> Self {
        let sample = Arc::clone(&value);
        Self {
            value,
            sampler: Sampler::new(scheduler, history_size, history_interval, sample),
        }
    }

    /// The current quotient. Division by a zero denominator rate yields
    /// infinity or NaN per IEEE semantics. Touches the statistic.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.sampler.touch();
        self.start();
        (self.value)()
    }

    /// Snapshot of the sampled history. Touches the statistic.
    #[must_use]
    pub fn history(&self) -> Vec<Sample> {
        self.sampler.touch();
        self.start();
        self.sampler.history.snapshot()
    }

    /// Activate periodic sampling. Idempotent.
    pub fn start(&self) {
        if self.sampler.start() {
            debug!("ratio statistic activated");
        }
    }

    /// Whether the sampling task is currently scheduled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.sampler.is_active()
    }

    /// Replace the history capacity and sampling interval.
    pub fn set_history(&self, size: usize, interval: Duration) {
        self.sampler.set_history(size, interval);
    }

    /// Deactivate if untouched since `threshold`. Returns true when the
    /// statistic ends up dormant.
    pub fn expire(&self, threshold: u64) -> bool {
        self.sampler.expire(threshold)
    }
}

impl SampledView for RatioStatistic {
    fn value(&self) -> f64 {
        RatioStatistic::value(self)
    }

    fn history(&self) -> Vec<Sample> {
        RatioStatistic::history(self)
    }

    fn start(&self) {
        RatioStatistic::start(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::outcome_enum! {
        enum Probe { Hit, Miss }
    }

    fn statistic(
        counter: &Arc<OperationCounter<Probe>>,
        targets: OutcomeSet<Probe>,
    ) -> ResultStatistic<Probe> {
        ResultStatistic::new(
            Arc::clone(counter),
            targets,
            Duration::from_secs(1),
            8,
            Duration::from_millis(10),
            Scheduler::current(),
        )
    }

    #[tokio::test]
    async fn count_reads_live_tallies() {
        let counter = Arc::new(OperationCounter::<Probe>::new("get", []));
        let stat = statistic(&counter, OutcomeSet::of([Probe::Hit, Probe::Miss]));
        counter.end(Probe::Hit);
        counter.end(Probe::Miss);
        counter.end(Probe::Hit);
        assert_eq!(stat.count(), 3);

        let hits = statistic(&counter, OutcomeSet::singleton(Probe::Hit));
        assert_eq!(hits.count(), 2);
    }

    #[tokio::test]
    async fn rate_counts_only_target_categories() {
        let counter = Arc::new(OperationCounter::<Probe>::new("get", []));
        let stat = statistic(&counter, OutcomeSet::singleton(Probe::Hit));
        stat.start();
        for _ in 0..6 {
            counter.end(Probe::Hit);
        }
        counter.end(Probe::Miss);
        assert!((stat.rate() - 6.0).abs() < 1.0, "rate {}", stat.rate());
    }

    #[tokio::test]
    async fn sampling_fills_history_until_expired() {
        let counter = Arc::new(OperationCounter::<Probe>::new("get", []));
        let stat = statistic(&counter, OutcomeSet::singleton(Probe::Hit));
        stat.start();
        assert!(stat.is_active());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!stat.history().is_empty());

        // Expire with a threshold in the future of the last touch.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(stat.expire(now_nanos() + 1));
        assert!(!stat.is_active());
        assert_eq!(counter.derived_len(), 0);

        // Fresh statistics report dormant without ever having run.
        let idle = statistic(&counter, OutcomeSet::singleton(Probe::Miss));
        assert!(idle.expire(now_nanos() + 1));
    }

    #[tokio::test]
    async fn expire_is_refused_while_recently_touched() {
        let counter = Arc::new(OperationCounter::<Probe>::new("get", []));
        let stat = statistic(&counter, OutcomeSet::singleton(Probe::Hit));
        let _ = stat.rate();
        assert!(stat.is_active());
        // Threshold far in the past: the touch above is newer.
        assert!(!stat.expire(now_nanos().saturating_sub(1_000_000_000)));
        assert!(stat.is_active());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn observer_membership_matches_activation_under_churn() {
        let counter = Arc::new(OperationCounter::<Probe>::new("get", []));
        let stat = Arc::new(statistic(&counter, OutcomeSet::singleton(Probe::Hit)));

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let stat = Arc::clone(&stat);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if i % 2 == 0 {
                            let _ = stat.rate();
                        } else {
                            stat.expire(now_nanos() + 1);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        // A dormant statistic must have no observer attached.
        assert!(stat.expire(now_nanos() + 1));
        assert_eq!(counter.derived_len(), 0);

        // Exactly one observer per activation, however many starts race.
        stat.start();
        stat.start();
        assert_eq!(counter.derived_len(), 1);
    }

    #[tokio::test]
    async fn ratio_division_follows_ieee_semantics() {
        let counter = Arc::new(OperationCounter::<Probe>::new("get", []));
        let hits = Arc::new(statistic(&counter, OutcomeSet::singleton(Probe::Hit)));
        let misses = Arc::new(statistic(&counter, OutcomeSet::singleton(Probe::Miss)));

        let (n, d) = (Arc::clone(&hits), Arc::clone(&misses));
        let ratio = RatioStatistic::new(
            Arc::new(move || n.rate() / d.rate()),
            8,
            Duration::from_millis(10),
            Scheduler::current(),
        );

        // Both zero: NaN.
        assert!(ratio.value().is_nan());

        // Numerator positive, denominator zero: positive infinity.
        hits.start();
        for _ in 0..5 {
            counter.end(Probe::Hit);
        }
        assert_eq!(ratio.value(), f64::INFINITY);
    }
}
