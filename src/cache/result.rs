//! Immutable cache snapshot.

/// A refreshed value plus the times at which it must be refreshed.
///
/// `stale_time` is the point after which the value may no longer be served
/// without a blocking refresh; `prefetch_time` is the earlier point after
/// which a background refresh should be started. `prefetch_time` never
/// exceeds `stale_time`; a prefetch time equal to the stale time means
/// "never prefetch".
#[derive(Clone, Debug)]
pub struct RefreshResult<T> {
    value: T,
    stale_time: i64,
    prefetch_time: i64,
}

impl<T> RefreshResult<T> {
    /// Value that goes stale at `stale_time` (epoch millis) and is never
    /// prefetched.
    pub fn new(value: T, stale_time: i64) -> Self {
        Self {
            value,
            stale_time,
            prefetch_time: stale_time,
        }
    }

    /// Set the prefetch time, clamped to the stale time.
    pub fn with_prefetch_time(mut self, prefetch_time: i64) -> Self {
        self.prefetch_time = prefetch_time.min(self.stale_time);
        self
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn stale_time(&self) -> i64 {
        self.stale_time
    }

    pub fn prefetch_time(&self) -> i64 {
        self.prefetch_time
    }

    pub fn is_stale(&self, now_millis: i64) -> bool {
        now_millis >= self.stale_time
    }

    /// Due for a background refresh but still servable.
    pub fn should_prefetch(&self, now_millis: i64) -> bool {
        !self.is_stale(now_millis) && now_millis >= self.prefetch_time
    }
}

impl<T: Clone> RefreshResult<T> {
    /// Same value with a new stale time and no prefetch before it.
    pub fn rescheduled(&self, stale_time: i64) -> Self {
        Self {
            value: self.value.clone(),
            stale_time,
            prefetch_time: stale_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefetch_defaults_to_stale_time() {
        let result = RefreshResult::new("v", 1_000);
        assert_eq!(result.prefetch_time(), 1_000);
        assert!(!result.should_prefetch(999));
        assert!(result.is_stale(1_000));
    }

    #[test]
    fn test_prefetch_time_is_clamped() {
        let result = RefreshResult::new("v", 1_000).with_prefetch_time(5_000);
        assert_eq!(result.prefetch_time(), 1_000);
    }

    #[test]
    fn test_should_prefetch_window() {
        let result = RefreshResult::new("v", 1_000).with_prefetch_time(500);
        assert!(!result.should_prefetch(499));
        assert!(result.should_prefetch(500));
        assert!(result.should_prefetch(999));
        assert!(!result.should_prefetch(1_000));
    }

    #[test]
    fn test_rescheduled_keeps_value() {
        let result = RefreshResult::new(String::from("v"), 1_000).with_prefetch_time(500);
        let moved = result.rescheduled(9_000);
        assert_eq!(moved.value(), "v");
        assert_eq!(moved.stale_time(), 9_000);
        assert_eq!(moved.prefetch_time(), 9_000);
    }
}
