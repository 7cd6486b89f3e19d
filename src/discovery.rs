//! Locating raw counters in a surrounding object graph
//!
//! Discovery is a consumed capability: given an outcome-kind type, an
//! operation name, and a required tag set, return every matching counter.
//! The registry treats zero results as "absent", exactly one as a bind, and
//! more than one as a fatal ambiguity. `CounterGraph` is the in-process
//! implementation used by embedders without their own graph query layer:
//! instrumented objects register their counters, discovery matches on name
//! equality, outcome-kind type equality, and tag superset.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::counter::OperationCounter;
use crate::outcome::Outcome;

/// A counter with its concrete outcome type erased. Downcasts back to
/// `Arc<OperationCounter<T>>` in the registry's bind step.
pub type ErasedCounter = Arc<dyn Any + Send + Sync>;

/// One discovery request.
#[derive(Debug)]
pub struct CounterQuery<'a> {
    /// `TypeId` of the outcome kind the counter must be declared over.
    pub outcome_type: TypeId,
    /// Operation name the counter was declared with.
    pub name: &'a str,
    /// Tags the counter's tag set must be a superset of.
    pub tags: &'a HashSet<String>,
}

/// The discovery capability consumed by the registry.
pub trait CounterDiscovery: Send + Sync {
    /// Every counter matching the query, in no particular order.
    fn find(&self, query: &CounterQuery<'_>) -> Vec<ErasedCounter>;
}

struct GraphEntry {
    name: String,
    outcome_type: TypeId,
    tags: HashSet<String>,
    counter: ErasedCounter,
}

/// Registration-based discovery over a flat set of counters.
#[derive(Default)]
pub struct CounterGraph {
    entries: RwLock<Vec<GraphEntry>>,
}

impl CounterGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a counter discoverable. The name and tags are read from the
    /// counter itself.
    pub fn register<T: Outcome>(&self, counter: Arc<OperationCounter<T>>) {
        debug!(name = counter.name(), "registering counter for discovery");
        let entry = GraphEntry {
            name: counter.name().to_string(),
            outcome_type: TypeId::of::<T>(),
            tags: counter.tags().clone(),
            counter: counter as ErasedCounter,
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Remove a previously registered counter, matched by pointer identity.
    pub fn unregister(&self, counter: &ErasedCounter) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|entry| !Arc::ptr_eq(&entry.counter, counter));
    }
}

impl CounterDiscovery for CounterGraph {
    fn find(&self, query: &CounterQuery<'_>) -> Vec<ErasedCounter> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| {
                entry.outcome_type == query.outcome_type
                    && entry.name == query.name
                    && query.tags.iter().all(|tag| entry.tags.contains(tag))
            })
            .map(|entry| Arc::clone(&entry.counter))
            .collect()
    }
}
