//! Next-eligible-time computation: frequency base, failure backoff, jitter

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Consecutive failures at which a source is marked degraded
pub const DEGRADED_THRESHOLD: u32 = 5;

/// Longest interval backoff can produce
pub fn max_backoff() -> Duration {
    Duration::days(7)
}

/// Interval before the next check after `failures` consecutive failures
///
/// `base × 2^failures`, capped at seven days. Degraded sources always get
/// the cap.
pub fn backoff_interval(base: Duration, failures: u32) -> Duration {
    let cap = max_backoff();
    if failures == 0 {
        return base.min(cap);
    }
    if is_degraded(failures) || failures >= 32 {
        return cap;
    }
    let seconds = base.num_seconds().saturating_mul(1i64 << failures);
    Duration::seconds(seconds).min(cap)
}

pub fn is_degraded(failures: u32) -> bool {
    failures >= DEGRADED_THRESHOLD
}

/// Uniform random offset between zero and `ceiling_minutes`
pub fn jitter<R: Rng + ?Sized>(rng: &mut R, ceiling_minutes: u32) -> Duration {
    if ceiling_minutes == 0 {
        return Duration::zero();
    }
    let ceiling = i64::from(ceiling_minutes) * 60;
    Duration::seconds(rng.random_range(0..=ceiling))
}

/// Next eligible check time for a source
///
/// # Arguments
///
/// * `now` - When the current check finished
/// * `base` - Interval derived from the source's update frequency
/// * `failures` - Consecutive failures including the current one
/// * `jitter` - Offset added after the cap
pub fn next_check_after(
    now: DateTime<Utc>,
    base: Duration,
    failures: u32,
    jitter: Duration,
) -> DateTime<Utc> {
    now + backoff_interval(base, failures) + jitter
}
