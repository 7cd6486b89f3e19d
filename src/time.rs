//! Process-monotonic clock used for window bucketing and expiry thresholds
//!
//! All timestamps in this crate are nanoseconds elapsed since the first call
//! into this module. Using a single process-local epoch keeps arithmetic on
//! `u64` and avoids `Instant` subtraction panics across unrelated instants.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Bias added to every reading so the clock never reports values near zero;
/// zero stays available as a "never written" sentinel in window partitions.
const BIAS_NANOS: u64 = 1 << 33;

/// Nanoseconds elapsed since the process-local epoch, plus a fixed bias.
///
/// Monotonic and safe to compare across threads. Wraps after ~584 years.
#[must_use]
pub fn now_nanos() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(epoch).as_nanos() as u64 + BIAS_NANOS
}

/// Current wall-clock time in milliseconds since the unix epoch.
///
/// Used only to timestamp history samples for display; never used for
/// window or expiry arithmetic.
#[must_use]
pub fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_nanos_is_monotonic() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
    }
}
