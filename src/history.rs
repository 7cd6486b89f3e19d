//! Bounded history of periodically captured samples
//!
//! Each derived statistic keeps a ring of its most recent point-in-time
//! values, refreshed by its sampling task while active. Capacity is
//! runtime-reconfigurable; shrinking never discards already-collected
//! samples eagerly, the ring just trims as new samples arrive.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::time::wall_millis;

/// One captured sample: a value and the wall-clock time it was taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Milliseconds since the unix epoch at capture time.
    pub at_millis: u64,
    pub value: f64,
}

/// Fixed-capacity ring of the most recent samples.
///
/// Writes happen on sampling ticks, reads on consumer queries; neither is a
/// hot path, so a mutexed deque is sufficient.
#[derive(Debug)]
pub struct SampleHistory {
    capacity: AtomicUsize,
    samples: Mutex<VecDeque<Sample>>,
}

impl SampleHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity.max(1)),
            samples: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// The currently configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Reconfigure the capacity. Applies as new samples are recorded;
    /// existing samples are kept until displaced.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity.max(1), Ordering::Relaxed);
    }

    /// Append a sample taken now, displacing the oldest beyond capacity.
    pub fn record(&self, value: f64) {
        self.record_at(value, wall_millis());
    }

    pub(crate) fn record_at(&self, value: f64, at_millis: u64) {
        let capacity = self.capacity();
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push_back(Sample { at_millis, value });
        while samples.len() > capacity {
            samples.pop_front();
        }
    }

    /// Copy of the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_displaces_oldest() {
        let history = SampleHistory::new(3);
        for i in 0..5 {
            history.record_at(i as f64, 1000 + i);
        }
        let values: Vec<f64> = history.snapshot().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn shrinking_capacity_trims_lazily() {
        let history = SampleHistory::new(4);
        for i in 0..4 {
            history.record_at(i as f64, 1000 + i);
        }
        history.set_capacity(2);
        // Nothing discarded until the next sample arrives.
        assert_eq!(history.len(), 4);
        history.record_at(9.0, 2000);
        let values: Vec<f64> = history.snapshot().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![3.0, 9.0]);
    }

    #[test]
    fn growing_capacity_keeps_history() {
        let history = SampleHistory::new(2);
        history.record_at(1.0, 1000);
        history.record_at(2.0, 1001);
        history.set_capacity(4);
        history.record_at(3.0, 1002);
        assert_eq!(history.len(), 3);
    }
}
