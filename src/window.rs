//! Bucketed sliding-window event counter
//!
//! Backs `rate()` on derived statistics. The trailing window is split into a
//! fixed ring of partitions; each partition holds the event count for one
//! aligned time slice. Recording is two atomic loads and a `fetch_add` on
//! the common path, with a CAS only when a partition rolls over to a new
//! slice. The rate is the sum of partitions still inside the window divided
//! by the window length, so events age out at partition granularity as time
//! passes, independent of sampling ticks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::time::now_nanos;

/// Number of slices the window is divided into. More partitions give a
/// smoother slide at the cost of a longer sum on the read path.
const PARTITIONS: usize = 10;

#[derive(Debug)]
struct Partition {
    /// Start of the aligned time slice this partition currently covers,
    /// in clock nanoseconds. Zero means never written.
    start: AtomicU64,
    count: AtomicU64,
}

/// Sliding-window event counter over a runtime-reconfigurable window.
#[derive(Debug)]
pub struct WindowedRate {
    window_nanos: AtomicU64,
    partitions: [Partition; PARTITIONS],
}

impl WindowedRate {
    /// Create a windowed counter over `window`. Sub-nanosecond or zero
    /// windows are clamped to one partition length of 1ns.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window_nanos: AtomicU64::new(Self::clamp_window(window)),
            partitions: std::array::from_fn(|_| Partition {
                start: AtomicU64::new(0),
                count: AtomicU64::new(0),
            }),
        }
    }

    fn clamp_window(window: Duration) -> u64 {
        (window.as_nanos() as u64).max(PARTITIONS as u64)
    }

    /// Replace the window. Takes effect for subsequent reads and writes;
    /// events already recorded keep their timestamps and age out under the
    /// new window length.
    pub fn set_window(&self, window: Duration) {
        self.window_nanos
            .store(Self::clamp_window(window), Ordering::Relaxed);
    }

    /// The currently configured window.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window_nanos.load(Ordering::Relaxed))
    }

    /// Record `n` events now.
    #[inline]
    pub fn record(&self, n: u64) {
        self.record_at(n, now_nanos());
    }

    /// Events per second over the trailing window, ending now.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate_at(now_nanos())
    }

    pub(crate) fn record_at(&self, n: u64, now: u64) {
        let window = self.window_nanos.load(Ordering::Relaxed);
        let slice = window / PARTITIONS as u64;
        let start = now - now % slice;
        let partition = &self.partitions[((now / slice) as usize) % PARTITIONS];

        let current = partition.start.load(Ordering::Acquire);
        if current != start {
            // Partition rolled over to a new slice; one racer resets the
            // count, the rest fall through and accumulate into the fresh
            // slice. An increment racing the reset can be attributed to the
            // old slice, which only costs windowed-rate precision.
            if partition
                .start
                .compare_exchange(current, start, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                partition.count.store(0, Ordering::Release);
            }
        }
        partition.count.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn rate_at(&self, now: u64) -> f64 {
        let window = self.window_nanos.load(Ordering::Relaxed);
        let events = self.events_in_window(now, window);
        events as f64 / Duration::from_nanos(window).as_secs_f64()
    }

    fn events_in_window(&self, now: u64, window: u64) -> u64 {
        let floor = now.saturating_sub(window);
        self.partitions
            .iter()
            .map(|p| {
                let start = p.start.load(Ordering::Acquire);
                if start > floor && start <= now {
                    p.count.load(Ordering::Relaxed)
                } else {
                    0
                }
            })
            .sum()
    }
}
