//! Get-or-refresh cache with single-flight refresh.
//!
//! The current [`RefreshResult`] lives in an `ArcSwapOption`: readers load it
//! without locking and always see a whole snapshot. Writers replace it while
//! holding one of two refresh locks, a `parking_lot` mutex for the blocking
//! channel and a tokio mutex for the async channel. The channels do not
//! block each other, so a blocking and an async caller may both refresh.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use super::jitter::{jitter_time, max_stale_failure_jitter};
use super::prefetch::{OneCallerBlocks, PrefetchStrategy};
use super::result::RefreshResult;
use crate::time::{SystemClock, TimeSource};
use crate::{Error, Result};

/// Longest wait for another caller's in-flight refresh.
pub const REFRESH_BLOCKING_MAX_WAIT: Duration = Duration::from_secs(5);

pub(crate) const NO_CACHED_VALUE: &str = "No cached value was found.";

const STRICT_RETRY_DELAY_MS: i64 = 1_000;
const ALLOW_STALE_BACKOFF_MS: i64 = 50_000;
const ALLOW_STALE_BACKOFF_JITTER_MS: i64 = 20_000;
const STALE_FAILURE_JITTER_START_MS: i64 = 1_000;

/// What to do with a stale cached value when refreshing it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleValueBehavior {
    /// Fail the caller; a stale value is never served.
    #[default]
    Strict,
    /// Keep serving the stale value and retry after a jittered delay.
    Allow,
}

/// Produces fresh values for a [`RefreshCachedSupplier`].
#[async_trait]
pub trait Refresh<T>: Send + Sync {
    fn refresh_blocking(&self) -> Result<RefreshResult<T>>;

    async fn refresh(&self) -> Result<RefreshResult<T>>;
}

/// Construction parameters for [`RefreshCachedSupplier`].
pub struct SupplierOptions {
    /// Defaults to [`OneCallerBlocks`].
    pub prefetch_strategy: Box<dyn PrefetchStrategy>,
    /// Defaults to [`StaleValueBehavior::Strict`].
    pub stale_value_behavior: StaleValueBehavior,
    /// Spread prefetch times so many instances do not refresh in lockstep.
    /// Defaults to `true`.
    pub jitter_enabled: bool,
    /// Defaults to [`SystemClock`].
    pub clock: Arc<dyn TimeSource>,
}

impl Default for SupplierOptions {
    fn default() -> Self {
        Self {
            prefetch_strategy: Box::new(OneCallerBlocks::new()),
            stale_value_behavior: StaleValueBehavior::Strict,
            jitter_enabled: true,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Serves `T` from a cached [`RefreshResult`], refreshing through a
/// [`Refresh`] implementation when the value is stale or due for prefetch.
pub struct RefreshCachedSupplier<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    cached: ArcSwapOption<RefreshResult<T>>,
    blocking_lock: parking_lot::Mutex<()>,
    async_lock: tokio::sync::Mutex<()>,
    consecutive_failures: AtomicU32,
    prefetch_failures: AtomicU32,
    refresher: Arc<dyn Refresh<T>>,
    prefetch: Box<dyn PrefetchStrategy>,
    stale_value_behavior: StaleValueBehavior,
    jitter_enabled: bool,
    clock: Arc<dyn TimeSource>,
}

impl<T> fmt::Debug for RefreshCachedSupplier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.inner.cached.load_full();
        f.debug_struct("RefreshCachedSupplier")
            .field("stale_time", &cached.as_ref().map(|c| c.stale_time()))
            .field("prefetch_time", &cached.as_ref().map(|c| c.prefetch_time()))
            .field("prefetch", &self.inner.prefetch)
            .field("stale_value_behavior", &self.inner.stale_value_behavior)
            .finish()
    }
}

impl<T> RefreshCachedSupplier<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(refresher: Arc<dyn Refresh<T>>, options: SupplierOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                cached: ArcSwapOption::empty(),
                blocking_lock: parking_lot::Mutex::new(()),
                async_lock: tokio::sync::Mutex::new(()),
                consecutive_failures: AtomicU32::new(0),
                prefetch_failures: AtomicU32::new(0),
                refresher,
                prefetch: options.prefetch_strategy,
                stale_value_behavior: options.stale_value_behavior,
                jitter_enabled: options.jitter_enabled,
                clock: options.clock,
            }),
        }
    }

    /// Blocking channel. Must not be called from inside an async runtime
    /// worker if the refresher performs blocking I/O.
    pub fn get_blocking(&self) -> Result<T> {
        let now = self.inner.clock.now_millis();
        if self.inner.is_stale(now) {
            self.inner.blocking_refresh()?;
        } else if self.inner.should_prefetch(now) {
            let inner = Arc::clone(&self.inner);
            self.inner
                .prefetch
                .prefetch(Box::new(move || inner.refresh_cache_blocking()));
        }
        self.inner.current_value()
    }

    /// Async channel.
    pub async fn get(&self) -> Result<T> {
        let now = self.inner.clock.now_millis();
        if self.inner.is_stale(now) {
            self.inner.async_refresh().await?;
        } else if self.inner.should_prefetch(now) {
            let inner = Arc::clone(&self.inner);
            self.inner
                .prefetch
                .prefetch_async(Box::pin(async move { inner.refresh_cache().await }))
                .await;
        }
        self.inner.current_value()
    }

    /// Current snapshot, if any value was ever stored.
    pub fn cached(&self) -> Option<Arc<RefreshResult<T>>> {
        self.inner.cached.load_full()
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn is_stale(&self, now: i64) -> bool {
        self.cached
            .load_full()
            .is_none_or(|cached| cached.is_stale(now))
    }

    fn should_prefetch(&self, now: i64) -> bool {
        self.cached
            .load_full()
            .is_some_and(|cached| cached.should_prefetch(now))
    }

    fn current_value(&self) -> Result<T> {
        self.cached
            .load_full()
            .map(|cached| cached.value().clone())
            .ok_or_else(|| Error::credential(NO_CACHED_VALUE))
    }

    fn blocking_refresh(&self) -> Result<()> {
        let Some(_guard) = self.blocking_lock.try_lock_for(REFRESH_BLOCKING_MAX_WAIT) else {
            tracing::warn!(
                wait_ms = REFRESH_BLOCKING_MAX_WAIT.as_millis() as u64,
                "Timed out waiting for in-flight credentials refresh"
            );
            return Ok(());
        };

        if self.is_stale(self.clock.now_millis()) {
            self.refresh_cache_blocking()?;
        }
        Ok(())
    }

    async fn async_refresh(&self) -> Result<()> {
        let Ok(_guard) =
            tokio::time::timeout(REFRESH_BLOCKING_MAX_WAIT, self.async_lock.lock()).await
        else {
            tracing::warn!(
                wait_ms = REFRESH_BLOCKING_MAX_WAIT.as_millis() as u64,
                "Timed out waiting for in-flight credentials refresh"
            );
            return Ok(());
        };

        if self.is_stale(self.clock.now_millis()) {
            self.refresh_cache().await?;
        }
        Ok(())
    }

    fn refresh_cache_blocking(&self) -> Result<()> {
        let fetched = self.refresher.refresh_blocking();
        self.apply(fetched)
    }

    async fn refresh_cache(&self) -> Result<()> {
        let fetched = self.refresher.refresh().await;
        self.apply(fetched)
    }

    /// Failures of a servable value's prefetch and failures of a stale
    /// value under [`StaleValueBehavior::Allow`] back off independently.
    /// Other failures are not counted.
    fn count_failure(&self, cached: Option<&RefreshResult<T>>, now: i64) -> u32 {
        let counter = match cached {
            Some(cached) if !cached.is_stale(now) => &self.prefetch_failures,
            Some(_) if self.stale_value_behavior == StaleValueBehavior::Allow => {
                &self.consecutive_failures
            }
            _ => return self.consecutive_failures.load(Ordering::Relaxed),
        };
        counter.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    fn apply(&self, fetched: Result<RefreshResult<T>>) -> Result<()> {
        let now = self.clock.now_millis();
        let cached = self.cached.load_full();

        let next = match fetched {
            Ok(fresh) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.prefetch_failures.store(0, Ordering::Relaxed);
                handle_fetched_success(
                    fresh,
                    cached.as_deref(),
                    now,
                    self.stale_value_behavior,
                    self.jitter_enabled,
                )?
            }
            Err(error) => {
                let failures = self.count_failure(cached.as_deref(), now);
                handle_fetched_failure(
                    error,
                    cached.as_deref(),
                    now,
                    self.stale_value_behavior,
                    failures,
                )
                .map_err(into_credential_error)?
            }
        };

        tracing::debug!(
            stale_time = next.stale_time(),
            prefetch_time = next.prefetch_time(),
            "Credentials cache updated"
        );
        self.cached.store(Some(Arc::new(next)));
        Ok(())
    }
}

fn into_credential_error(error: Error) -> Error {
    match error {
        Error::Credential { .. } => error,
        other => Error::credential(format!("Failed to refresh credentials: {}", other)),
    }
}

/// Decide what to cache after a successful refresh.
///
/// A fresh value that is not yet stale is stored. One that is already stale
/// (a backend anomaly) is rejected in favour of the cached value, which is
/// kept as-is while servable, and otherwise rescheduled: 1s out under
/// [`StaleValueBehavior::Strict`], 50-70s out under
/// [`StaleValueBehavior::Allow`].
pub fn handle_fetched_success<T: Clone>(
    fresh: RefreshResult<T>,
    cached: Option<&RefreshResult<T>>,
    now: i64,
    behavior: StaleValueBehavior,
    jitter_enabled: bool,
) -> Result<RefreshResult<T>> {
    if !fresh.is_stale(now) {
        return Ok(schedule_prefetch(fresh, now, jitter_enabled));
    }

    tracing::warn!(
        stale_time = fresh.stale_time(),
        now,
        "Refreshed credentials are already stale"
    );

    let Some(cached) = cached else {
        return Err(Error::credential(NO_CACHED_VALUE));
    };

    if !cached.is_stale(now) {
        return Ok(cached.clone());
    }

    let stale_time = match behavior {
        StaleValueBehavior::Strict => now.saturating_add(STRICT_RETRY_DELAY_MS),
        StaleValueBehavior::Allow => jitter_time(
            now,
            ALLOW_STALE_BACKOFF_MS,
            ALLOW_STALE_BACKOFF_MS + ALLOW_STALE_BACKOFF_JITTER_MS,
        ),
    };
    Ok(cached.rescheduled(stale_time))
}

/// Decide what to cache after a failed refresh.
///
/// Without a cached value the error is returned. A cached value that is
/// still servable is kept, with its next prefetch pushed out by a jittered
/// window that widens with `consecutive_failures` and never passes its
/// stale time. A stale one is rejected under
/// [`StaleValueBehavior::Strict`]; under [`StaleValueBehavior::Allow`] it is
/// served until a retry window that widens with `consecutive_failures`.
pub fn handle_fetched_failure<T: Clone>(
    error: Error,
    cached: Option<&RefreshResult<T>>,
    now: i64,
    behavior: StaleValueBehavior,
    consecutive_failures: u32,
) -> Result<RefreshResult<T>> {
    let Some(cached) = cached else {
        return Err(error);
    };

    if !cached.is_stale(now) {
        let retry_at = jitter_time(
            now,
            STALE_FAILURE_JITTER_START_MS,
            max_stale_failure_jitter(consecutive_failures),
        )
        .max(cached.prefetch_time())
        .min(cached.stale_time());
        tracing::warn!(
            error = %error,
            consecutive_failures,
            retry_in_ms = retry_at - now,
            "Credentials refresh failed, serving cached value"
        );
        return Ok(cached.clone().with_prefetch_time(retry_at));
    }

    match behavior {
        StaleValueBehavior::Strict => Err(error),
        StaleValueBehavior::Allow => {
            let stale_time = jitter_time(
                now,
                STALE_FAILURE_JITTER_START_MS,
                max_stale_failure_jitter(consecutive_failures),
            );
            tracing::warn!(
                error = %error,
                consecutive_failures,
                retry_in_ms = stale_time - now,
                "Credentials refresh failed, serving stale value"
            );
            Ok(cached.rescheduled(stale_time))
        }
    }
}

/// A fresh value whose prefetch time is already due gets one halfway to its
/// stale time; otherwise, with jitter, the prefetch time is pulled earlier
/// by up to 10% of its distance from now.
fn schedule_prefetch<T>(
    fresh: RefreshResult<T>,
    now: i64,
    jitter_enabled: bool,
) -> RefreshResult<T> {
    let stale_time = fresh.stale_time();
    let prefetch_time = fresh.prefetch_time();

    if prefetch_time <= now {
        let halfway = now + ((stale_time - now) / 2).max(1);
        return fresh.with_prefetch_time(halfway);
    }

    if jitter_enabled && prefetch_time < stale_time {
        let spread = (prefetch_time - now) / 10;
        if spread > 0 {
            return fresh.with_prefetch_time(prefetch_time - rand::random_range(0..spread));
        }
    }

    fresh
}
