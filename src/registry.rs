//! Statistics registry: discovery, lifecycle scheduling, registrations
//!
//! One registry binds a closed set of named operation kinds to the counters
//! backing them in the surrounding object graph, owns the periodic
//! idle-disable sweep, and records the externally visible list of named,
//! tagged statistic registrations.
//!
//! Construction is all-or-nothing: a required kind without a counter, an
//! ambiguous binding, or an invalid outcome enumeration aborts with a
//! [`RegistryError`] and no registry is produced. Optional kinds with no
//! counter are bound to a zero-reading stand-in and transparently upgraded
//! if a counter appears later.

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use crate::compound::{
    CompoundOperation, CountOperation, CountView, NullCompoundOperation, OperationControl,
    OperationStats, StatisticSettings,
};
use crate::config::StatisticsConfig;
use crate::counter::OperationCounter;
use crate::derived::{ResultView, SampledView};
use crate::discovery::{CounterDiscovery, CounterQuery, ErasedCounter};
use crate::error::RegistryError;
use crate::outcome::{Outcome, OutcomeSet, validate_outcome_kind};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::time::now_nanos;

/// Descriptor for one operation kind in a registry's closed enumeration:
/// the name and tags discovery matches on, whether a backing counter is
/// mandatory, and the outcome kind the counter must be declared over.
pub struct OperationType {
    name: String,
    required: bool,
    tags: HashSet<String>,
    outcome_type: TypeId,
    outcome_type_name: &'static str,
    validate: fn() -> Result<(), String>,
    bind: BindFn,
    placeholder: fn() -> OperationSlot,
}

type BindFn = fn(ErasedCounter, Arc<StatisticSettings>, Scheduler) -> Option<OperationSlot>;

impl OperationType {
    /// A kind whose absence at construction is a fatal configuration
    /// error.
    #[must_use]
    pub fn required<T: Outcome>(
        name: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::of::<T>(name.into(), tags.into_iter().collect(), true)
    }

    /// A kind that may be absent; it binds to a zero-reading stand-in
    /// until a counter appears.
    #[must_use]
    pub fn optional<T: Outcome>(
        name: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::of::<T>(name.into(), tags.into_iter().collect(), false)
    }

    fn of<T: Outcome>(name: String, tags: HashSet<String>, required: bool) -> Self {
        Self {
            name,
            required,
            tags,
            outcome_type: TypeId::of::<T>(),
            outcome_type_name: type_name::<T>(),
            validate: validate_outcome_kind::<T>,
            bind: |counter, settings, scheduler| {
                let typed = counter.downcast::<OperationCounter<T>>().ok()?;
                Some(OperationSlot::live(Arc::new(CompoundOperation::new(
                    typed, settings, scheduler,
                ))))
            },
            placeholder: || OperationSlot::placeholder::<T>(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }
}

/// A bound operation kind: the typed statistics surface (erased to `Any`)
/// plus the kind-erased control surface driven by sweeps and toggles.
struct OperationSlot {
    /// Holds an `Arc<dyn OperationStats<T>>` for the kind's `T`.
    typed: Box<dyn Any + Send + Sync>,
    control: Arc<dyn OperationControl>,
}

impl OperationSlot {
    fn live<T: Outcome>(operation: Arc<CompoundOperation<T>>) -> Self {
        let typed: Arc<dyn OperationStats<T>> = Arc::clone(&operation) as _;
        Self {
            typed: Box::new(typed),
            control: operation,
        }
    }

    fn placeholder<T: Outcome>() -> Self {
        let operation = Arc::new(NullCompoundOperation::<T>::new());
        let typed: Arc<dyn OperationStats<T>> = Arc::clone(&operation) as _;
        Self {
            typed: Box::new(typed),
            control: operation,
        }
    }

    fn stats<T: Outcome>(&self) -> Option<Arc<dyn OperationStats<T>>> {
        self.typed
            .downcast_ref::<Arc<dyn OperationStats<T>>>()
            .map(Arc::clone)
    }
}

/// Externally consumable statistic handle, polymorphic over the three
/// registrable views.
#[derive(Clone)]
pub enum StatisticHandle {
    /// A compound (or single-category) result: rate, count, history.
    Result(Arc<dyn ResultView>),
    /// A raw-count view bypassing windows.
    Count(Arc<dyn CountView>),
    /// A sampled ratio: value, history.
    Ratio(Arc<dyn SampledView>),
}

/// One entry in the registry's external registration list.
#[derive(Clone)]
pub struct ExposedStatistic {
    pub name: String,
    /// `TypeId` of the outcome kind the statistic is declared over.
    pub outcome_type: TypeId,
    /// Diagnostic name of the outcome kind.
    pub outcome_type_name: &'static str,
    pub tags: HashSet<String>,
    pub properties: HashMap<String, serde_json::Value>,
    pub handle: StatisticHandle,
}

/// State shared with the background disable task.
struct Shared {
    operations: DashMap<String, OperationSlot>,
    time_to_disable_nanos: AtomicU64,
}

impl Shared {
    fn sweep(&self) {
        let time_to_disable = self.time_to_disable_nanos.load(Ordering::Relaxed);
        let threshold = now_nanos().saturating_sub(time_to_disable);
        trace!(threshold, "running idle-disable sweep");
        for entry in self.operations.iter() {
            if !entry.value().control.is_placeholder() {
                entry.value().control.expire(threshold);
            }
        }
    }
}

struct DisableState {
    task: Option<TaskHandle>,
}

/// Registry of derived statistics for one closed domain of operation
/// kinds.
pub struct StatisticsRegistry {
    descriptors: Vec<OperationType>,
    shared: Arc<Shared>,
    discovery: Arc<dyn CounterDiscovery>,
    scheduler: Scheduler,
    settings: Arc<StatisticSettings>,
    disable: Mutex<DisableState>,
    registrations: RwLock<Vec<ExposedStatistic>>,
}

impl StatisticsRegistry {
    /// Bind every operation kind and schedule the idle-disable sweep.
    ///
    /// Fails without producing a registry when the configuration is
    /// invalid, a kind's outcome enumeration is malformed, a required kind
    /// has no backing counter, or any kind resolves ambiguously.
    pub fn new(
        operation_types: Vec<OperationType>,
        discovery: Arc<dyn CounterDiscovery>,
        scheduler: Scheduler,
        config: &StatisticsConfig,
    ) -> Result<Self, RegistryError> {
        config.validate()?;

        let settings = Arc::new(StatisticSettings::new(
            config.window(),
            config.history_size,
            config.history_interval(),
        ));
        let shared = Arc::new(Shared {
            operations: DashMap::new(),
            time_to_disable_nanos: AtomicU64::new(config.time_to_disable().as_nanos() as u64),
        });

        let mut seen = HashSet::new();
        for descriptor in &operation_types {
            if !seen.insert(descriptor.name.clone()) {
                return Err(RegistryError::DuplicateOperationKind {
                    operation: descriptor.name.clone(),
                });
            }
            (descriptor.validate)().map_err(|reason| RegistryError::InvalidOutcomeKind {
                operation: descriptor.name.clone(),
                reason,
            })?;

            match Self::discover_one(discovery.as_ref(), descriptor)? {
                Some(counter) => {
                    let slot = (descriptor.bind)(counter, Arc::clone(&settings), scheduler.clone())
                        .ok_or_else(|| RegistryError::OutcomeTypeMismatch {
                            operation: descriptor.name.clone(),
                        })?;
                    debug!(operation = descriptor.name, "bound operation statistic");
                    shared.operations.insert(descriptor.name.clone(), slot);
                }
                None if descriptor.required => {
                    return Err(RegistryError::RequiredStatisticMissing {
                        operation: descriptor.name.clone(),
                    });
                }
                None => {
                    debug!(
                        operation = descriptor.name,
                        "optional statistic absent, installing stand-in"
                    );
                    shared
                        .operations
                        .insert(descriptor.name.clone(), (descriptor.placeholder)());
                }
            }
        }

        let registry = Self {
            descriptors: operation_types,
            shared,
            discovery,
            scheduler,
            settings,
            disable: Mutex::new(DisableState { task: None }),
            registrations: RwLock::new(Vec::new()),
        };

        if config.always_on {
            registry.set_always_on(true);
        } else {
            let period = config.time_to_disable();
            registry.lock_disable().task = Some(registry.schedule_sweep(period, period));
        }
        info!(
            operations = registry.descriptors.len(),
            always_on = config.always_on,
            "statistics registry constructed"
        );
        Ok(registry)
    }

    fn lock_disable(&self) -> std::sync::MutexGuard<'_, DisableState> {
        self.disable.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schedule_sweep(&self, initial_delay: Duration, period: Duration) -> TaskHandle {
        let shared = Arc::clone(&self.shared);
        self.scheduler
            .run_at_fixed_rate(initial_delay, period, move || shared.sweep())
    }

    fn discover_one(
        discovery: &dyn CounterDiscovery,
        descriptor: &OperationType,
    ) -> Result<Option<ErasedCounter>, RegistryError> {
        let query = CounterQuery {
            outcome_type: descriptor.outcome_type,
            name: &descriptor.name,
            tags: &descriptor.tags,
        };
        let mut matches = discovery.find(&query);
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            n => Err(RegistryError::DuplicateStatistic {
                operation: descriptor.name.clone(),
                matches: n,
            }),
        }
    }

    fn descriptor(&self, operation: &str) -> Result<&OperationType, RegistryError> {
        self.descriptors
            .iter()
            .find(|d| d.name == operation)
            .ok_or_else(|| RegistryError::UnknownOperation {
                operation: operation.to_string(),
            })
    }

    /// The typed statistics surface for one operation kind.
    ///
    /// A kind bound to the absent-optional stand-in re-runs discovery once
    /// and, if a counter now exists, atomically upgrades the binding; the
    /// loser of a concurrent upgrade race discards its candidate.
    pub fn operation<T: Outcome>(
        &self,
        operation: &str,
    ) -> Result<Arc<dyn OperationStats<T>>, RegistryError> {
        let descriptor = self.descriptor(operation)?;
        if TypeId::of::<T>() != descriptor.outcome_type {
            return Err(RegistryError::OutcomeTypeMismatch {
                operation: operation.to_string(),
            });
        }

        {
            let slot = self
                .shared
                .operations
                .get(operation)
                .ok_or_else(|| RegistryError::UnknownOperation {
                    operation: operation.to_string(),
                })?;
            if !slot.value().control.is_placeholder() {
                return slot.value().stats::<T>().ok_or_else(|| {
                    RegistryError::OutcomeTypeMismatch {
                        operation: operation.to_string(),
                    }
                });
            }
        }

        // Stand-in: re-run discovery and upgrade if a counter appeared.
        match Self::discover_one(self.discovery.as_ref(), descriptor)? {
            None => {
                let slot = self.shared.operations.get(operation).ok_or_else(|| {
                    RegistryError::UnknownOperation {
                        operation: operation.to_string(),
                    }
                })?;
                slot.value()
                    .stats::<T>()
                    .ok_or_else(|| RegistryError::OutcomeTypeMismatch {
                        operation: operation.to_string(),
                    })
            }
            Some(counter) => {
                // Build outside the map lock; install only if the slot is
                // still the stand-in, otherwise another thread won.
                let candidate =
                    (descriptor.bind)(counter, Arc::clone(&self.settings), self.scheduler.clone())
                        .ok_or_else(|| RegistryError::OutcomeTypeMismatch {
                            operation: operation.to_string(),
                        })?;
                let mut slot = self.shared.operations.get_mut(operation).ok_or_else(|| {
                    RegistryError::UnknownOperation {
                        operation: operation.to_string(),
                    }
                })?;
                if slot.value().control.is_placeholder() {
                    info!(operation, "upgraded stand-in to live operation statistic");
                    *slot.value_mut() = candidate;
                } else {
                    trace!(operation, "lost stand-in upgrade race");
                }
                slot.value()
                    .stats::<T>()
                    .ok_or_else(|| RegistryError::OutcomeTypeMismatch {
                        operation: operation.to_string(),
                    })
            }
        }
    }

    /// Expose the compound statistic over `results` under `name`.
    pub fn register_compound_operation<T: Outcome>(
        &self,
        name: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
        properties: HashMap<String, serde_json::Value>,
        operation: &str,
        results: impl IntoIterator<Item = T>,
    ) -> Result<(), RegistryError> {
        let stats = self.operation::<T>(operation)?;
        let handle = stats.compound(OutcomeSet::of(results));
        self.push_registration::<T>(name.into(), tags, properties, StatisticHandle::Result(handle));
        Ok(())
    }

    /// Expose the raw-count view of an operation kind under `name`.
    pub fn register_count_operation<T: Outcome>(
        &self,
        name: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
        properties: HashMap<String, serde_json::Value>,
        operation: &str,
    ) -> Result<(), RegistryError> {
        let stats = self.operation::<T>(operation)?;
        let handle: Arc<dyn CountView> = Arc::new(stats.as_count_operation());
        self.push_registration::<T>(name.into(), tags, properties, StatisticHandle::Count(handle));
        Ok(())
    }

    /// Expose the ratio of two compound rates under `name`.
    pub fn register_ratio<T: Outcome>(
        &self,
        name: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
        properties: HashMap<String, serde_json::Value>,
        operation: &str,
        numerator: impl IntoIterator<Item = T>,
        denominator: impl IntoIterator<Item = T>,
    ) -> Result<(), RegistryError> {
        let stats = self.operation::<T>(operation)?;
        let handle = stats.ratio_of(OutcomeSet::of(numerator), OutcomeSet::of(denominator));
        self.push_registration::<T>(name.into(), tags, properties, StatisticHandle::Ratio(handle));
        Ok(())
    }

    fn push_registration<T: Outcome>(
        &self,
        name: String,
        tags: impl IntoIterator<Item = String>,
        properties: HashMap<String, serde_json::Value>,
        handle: StatisticHandle,
    ) {
        // Append-only, no deduplication by name; callers own uniqueness.
        self.registrations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(ExposedStatistic {
                name,
                outcome_type: TypeId::of::<T>(),
                outcome_type_name: type_name::<T>(),
                tags: tags.into_iter().collect(),
                properties,
                handle,
            });
    }

    /// Snapshot of the registration list, in registration order.
    #[must_use]
    pub fn registrations(&self) -> Vec<ExposedStatistic> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop every registration. Bound operations are unaffected.
    pub fn clear_registrations(&self) {
        self.registrations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Toggle global always-on mode.
    ///
    /// Enabling cancels the idle-disable sweep and marks every bound
    /// operation always-on; disabling reschedules the sweep (first firing
    /// immediately) and unmarks them. A sweep already in flight when the
    /// toggle lands may still fire once; expiry is idempotent.
    pub fn set_always_on(&self, enabled: bool) {
        {
            let mut disable = self.lock_disable();
            if enabled {
                if let Some(task) = disable.task.take() {
                    task.cancel();
                }
            } else if disable.task.is_none() {
                let period = self.time_to_disable();
                disable.task = Some(self.schedule_sweep(Duration::ZERO, period));
            }
        }
        for entry in self.shared.operations.iter() {
            entry.value().control.set_always_on(enabled);
        }
        info!(enabled, "always-on mode toggled");
    }

    /// The current idle-disable threshold and sweep period.
    #[must_use]
    pub fn time_to_disable(&self) -> Duration {
        Duration::from_nanos(self.shared.time_to_disable_nanos.load(Ordering::Relaxed))
    }

    /// Reschedule the idle-disable sweep at a new period. Takes effect for
    /// the next tick; one stale firing of the old schedule is tolerated.
    pub fn set_time_to_disable(&self, time_to_disable: Duration) {
        let mut disable = self.lock_disable();
        self.shared
            .time_to_disable_nanos
            .store(time_to_disable.as_nanos() as u64, Ordering::Relaxed);
        if disable.task.is_some() {
            disable.task = Some(self.schedule_sweep(time_to_disable, time_to_disable));
        }
        debug!(?time_to_disable, "idle-disable rescheduled");
    }

    /// Propagate a new averaging window to every bound operation and to
    /// statistics built later.
    pub fn set_window(&self, window: Duration) {
        self.settings
            .window_nanos
            .store(window.as_nanos() as u64, Ordering::Relaxed);
        for entry in self.shared.operations.iter() {
            entry.value().control.set_window(window);
        }
    }

    /// Propagate a new history configuration to every bound operation and
    /// to statistics built later.
    pub fn set_history(&self, size: usize, interval: Duration) {
        if size == 0 {
            warn!("ignoring zero history size");
            return;
        }
        self.settings.history_size.store(size, Ordering::Relaxed);
        self.settings
            .history_interval_nanos
            .store(interval.as_nanos() as u64, Ordering::Relaxed);
        for entry in self.shared.operations.iter() {
            entry.value().control.set_history(size, interval);
        }
    }

    /// Run one idle-disable sweep immediately, in addition to the
    /// scheduled ones.
    pub fn sweep_now(&self) {
        self.shared.sweep();
    }

    /// The raw-count view for one operation kind.
    pub fn count_operation<T: Outcome>(
        &self,
        operation: &str,
    ) -> Result<CountOperation<T>, RegistryError> {
        Ok(self.operation::<T>(operation)?.as_count_operation())
    }
}
