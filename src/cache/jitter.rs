//! Randomized retry windows for stale values.

/// Smallest upper bound for the retry window after a failed refresh.
const MIN_STALE_FAILURE_JITTER_MS: i64 = 10_000;
/// Largest upper bound, reached after ~16 consecutive failures.
const MAX_STALE_FAILURE_JITTER_MS: i64 = 60 * 60 * 1000;
const BACKOFF_UNIT_MS: i64 = 100;

/// `time + jitter_start + random(0..jitter_end - jitter_start)`.
///
/// An empty range adds exactly `jitter_start`.
pub fn jitter_time(time: i64, jitter_start: i64, jitter_end: i64) -> i64 {
    let base = time.saturating_add(jitter_start);
    if jitter_end <= jitter_start {
        return base;
    }
    base.saturating_add(rand::random_range(0..jitter_end - jitter_start))
}

/// Upper bound of the retry window after `consecutive_failures` failed
/// refreshes of a stale value: `100ms * 2^(n-1)`, floored at 10s and
/// capped at one hour.
pub fn max_stale_failure_jitter(consecutive_failures: u32) -> i64 {
    let shift = consecutive_failures.saturating_sub(1).min(32);
    let backoff = BACKOFF_UNIT_MS.saturating_mul(1_i64 << shift);
    backoff.clamp(MIN_STALE_FAILURE_JITTER_MS, MAX_STALE_FAILURE_JITTER_MS)
}
