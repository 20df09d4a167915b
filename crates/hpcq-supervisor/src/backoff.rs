//! Restart backoff arithmetic for the Supervisor (spec §4.7): 1s doubling to
//! a 30s cap, reset after 5 minutes of continuous child uptime.
//!
//! Grounded on the same capped-exponential shape as
//! `hpcq-queue-client::backoff_delay`, generalized from jittered
//! milliseconds to plain seconds (restart backoff doesn't need jitter —
//! there's exactly one child, not a thundering herd of callers).

use std::time::Duration;

pub const MIN_UPTIME_FOR_RESET: Duration = Duration::from_secs(5 * 60);

/// Delay before the `attempt`-th restart (1-based): `min(30, 2^(attempt-1))` seconds.
pub fn restart_delay(attempt: u32) -> Duration {
    let exp = 1u64 << attempt.saturating_sub(1).min(5);
    Duration::from_secs(exp.min(30))
}
