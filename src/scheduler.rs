//! Fixed-rate repeating tasks on a shared tokio runtime
//!
//! The statistics engine schedules two classes of background work: per
//! statistic sampling ticks and the per-registry idle-disable sweep. Both
//! are plain repeating closures; rescheduling is cancel-then-resubmit.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Handle to a worker runtime that repeating tasks are spawned onto.
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    /// Schedule onto an explicit runtime handle.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto the runtime enclosing the caller.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, like
    /// [`Handle::current`].
    #[must_use]
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Run `task` every `period`, first after `initial_delay`, until the
    /// returned handle is cancelled or dropped. Ticks skipped while a tick
    /// is still running are dropped rather than bunched.
    pub fn run_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: impl Fn() + Send + Sync + 'static,
    ) -> TaskHandle {
        let period = period.max(Duration::from_millis(1));
        let join = self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                task();
            }
        });
        TaskHandle { join }
    }

    /// Spawn a one-shot future on the worker runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

/// Cancellable handle to a scheduled repeating task.
///
/// Cancellation prevents future ticks; it does not interrupt a tick already
/// running. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct TaskHandle {
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Stop future ticks.
    pub fn cancel(&self) {
        trace!("cancelling scheduled task");
        self.join.abort();
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn repeating_task_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::current();
        let counted = Arc::clone(&ticks);
        let handle = scheduler.run_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), move || {
            counted.fetch_add(1, Ordering::Relaxed);
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.cancel();
        // Allow a tick that was mid-flight at cancellation to finish.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_cancel = ticks.load(Ordering::Relaxed);
        assert!(after_cancel >= 2, "expected ticks, saw {after_cancel}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::Relaxed), after_cancel);
    }
}
