//! In-process operation statistics
//!
//! `opstats` counts discrete outcomes of instrumented operations and lazily
//! derives windowed rates, ratios, and sampled history from those counts.
//! Business code drives an [`OperationCounter`] on its hot path; everything
//! downstream (per-result statistics, compound subsets, ratios) is created
//! on first use, kept fresh by background sampling tasks, and expired again
//! when idle, without explicit registration or unregistration by callers.
//!
//! # Overview
//!
//! ```
//! use std::sync::Arc;
//! use opstats::{
//!     CounterGraph, OperationCounter, OperationType, OutcomeSet, StatisticsConfig,
//!     StatisticsRegistry, Scheduler,
//! };
//!
//! opstats::outcome_enum! {
//!     pub enum GetOutcome { Hit, Miss, Failure }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), opstats::RegistryError> {
//! // Instrumentation point: one counter per operation, driven on every call.
//! let counter = Arc::new(OperationCounter::<GetOutcome>::new("get", []));
//! let graph = Arc::new(CounterGraph::new());
//! graph.register(Arc::clone(&counter));
//!
//! let registry = StatisticsRegistry::new(
//!     vec![OperationType::required::<GetOutcome>("get", [])],
//!     graph,
//!     Scheduler::current(),
//!     &StatisticsConfig::default(),
//! )?;
//!
//! counter.end(GetOutcome::Hit);
//! counter.end(GetOutcome::Miss);
//!
//! let get = registry.operation::<GetOutcome>("get")?;
//! let all = get.compound(OutcomeSet::all());
//! assert_eq!(all.count(), 2);
//! # Ok(())
//! # }
//! ```

pub mod compound;
pub mod config;
pub mod counter;
pub mod derived;
pub mod discovery;
pub mod error;
pub mod history;
pub mod outcome;
pub mod registry;
pub mod scheduler;
pub mod time;
pub mod window;

pub use compound::{
    CompoundOperation, CountOperation, CountView, NullCompoundOperation, OperationControl,
    OperationStats,
};
pub use config::StatisticsConfig;
pub use counter::{OperationCounter, OperationObserver};
pub use derived::{RatioStatistic, ResultStatistic, ResultView, SampledView};
pub use discovery::{CounterDiscovery, CounterGraph, CounterQuery, ErasedCounter};
pub use error::{ConfigError, RegistryError};
pub use history::{Sample, SampleHistory};
pub use outcome::{Outcome, OutcomeSet};
pub use registry::{ExposedStatistic, OperationType, StatisticHandle, StatisticsRegistry};
pub use scheduler::{Scheduler, TaskHandle};
pub use window::WindowedRate;
