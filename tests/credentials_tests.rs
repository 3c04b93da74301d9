//! Cache and chain behaviour tests.
//!
//! Covers the refresh cache (staleness, single-flight, prefetch, stale
//! value policies) and the default provider chain (fallback, reuse of the
//! last provider).
//!
//! Run: cargo nextest run --test credentials_tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use alibabacloud_credentials::cache::{
    NonBlocking, REFRESH_BLOCKING_MAX_WAIT, Refresh, RefreshCachedSupplier, RefreshResult,
    StaleValueBehavior, SupplierOptions,
};
use alibabacloud_credentials::{
    CredentialModel, CredentialsProvider, Error, ManualClock, Result, TimeSource,
};
use async_trait::async_trait;

const NOW: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct ScriptedRefresh {
    clock: Arc<ManualClock>,
    calls: AtomicUsize,
    stale_in: i64,
    prefetch_in: Option<i64>,
    delay: Duration,
    slow_from: usize,
    fail_from: Option<usize>,
}

impl ScriptedRefresh {
    fn new(clock: &Arc<ManualClock>) -> Self {
        Self {
            clock: Arc::clone(clock),
            calls: AtomicUsize::new(0),
            stale_in: 10 * MINUTE,
            prefetch_in: None,
            delay: Duration::ZERO,
            slow_from: 1,
            fail_from: None,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Call number and how long this call should take.
    fn begin(&self) -> (usize, Duration) {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = if n >= self.slow_from {
            self.delay
        } else {
            Duration::ZERO
        };
        (n, delay)
    }

    fn produce(&self, n: usize) -> Result<RefreshResult<String>> {
        if self.fail_from.is_some_and(|from| n >= from) {
            return Err(Error::credential(format!("refresh {} failed", n)));
        }
        let now = self.clock.now_millis();
        let result = RefreshResult::new(format!("value-{}", n), now + self.stale_in);
        Ok(match self.prefetch_in {
            Some(prefetch_in) => result.with_prefetch_time(now + prefetch_in),
            None => result,
        })
    }
}

#[async_trait]
impl Refresh<String> for ScriptedRefresh {
    fn refresh_blocking(&self) -> Result<RefreshResult<String>> {
        let (n, delay) = self.begin();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.produce(n)
    }

    async fn refresh(&self) -> Result<RefreshResult<String>> {
        let (n, delay) = self.begin();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.produce(n)
    }
}

fn supplier(
    refresh: &Arc<ScriptedRefresh>,
    clock: &Arc<ManualClock>,
    behavior: StaleValueBehavior,
) -> RefreshCachedSupplier<String> {
    RefreshCachedSupplier::new(
        refresh.clone(),
        SupplierOptions {
            stale_value_behavior: behavior,
            jitter_enabled: false,
            clock: clock.clone(),
            ..Default::default()
        },
    )
}

// =============================================================================
// Refresh cache
// =============================================================================

mod cache_tests {
    use super::*;

    #[test]
    fn test_fresh_value_served_without_refresh() {
        init_tracing();
        let clock = Arc::new(ManualClock::new(NOW));
        let refresh = Arc::new(ScriptedRefresh::new(&clock));
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Strict);

        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        clock.advance_millis(10 * MINUTE - 1);
        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        assert_eq!(refresh.calls(), 1);

        clock.advance_millis(1);
        assert_eq!(supplier.get_blocking().unwrap(), "value-2");
        assert_eq!(refresh.calls(), 2);
    }

    #[test]
    fn test_channels_share_cached_value() {
        let clock = Arc::new(ManualClock::new(NOW));
        let refresh = Arc::new(ScriptedRefresh::new(&clock));
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Strict);

        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        assert_eq!(tokio_test::block_on(supplier.get()).unwrap(), "value-1");
        assert_eq!(refresh.calls(), 1);
    }

    #[test]
    fn test_single_flight_blocking() {
        init_tracing();
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.delay = Duration::from_millis(100);
        let refresh = Arc::new(scripted);
        let supplier = Arc::new(supplier(&refresh, &clock, StaleValueBehavior::Strict));

        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let supplier = Arc::clone(&supplier);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    supplier.get_blocking()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "value-1");
        }
        assert_eq!(refresh.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_async() {
        init_tracing();
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.delay = Duration::from_millis(100);
        let refresh = Arc::new(scripted);
        let supplier = Arc::new(supplier(&refresh, &clock, StaleValueBehavior::Strict));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let supplier = Arc::clone(&supplier);
                tokio::spawn(async move { supplier.get().await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "value-1");
        }
        assert_eq!(refresh.calls(), 1);
    }

    #[test]
    fn test_prefetch_serves_current_value_then_new_one() {
        init_tracing();
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.prefetch_in = Some(5 * MINUTE);
        scripted.delay = Duration::from_millis(200);
        let refresh = Arc::new(scripted);
        let supplier = RefreshCachedSupplier::new(
            refresh.clone(),
            SupplierOptions {
                prefetch_strategy: Box::new(NonBlocking::new()),
                jitter_enabled: false,
                clock: clock.clone(),
                ..Default::default()
            },
        );

        assert_eq!(supplier.get_blocking().unwrap(), "value-1");

        clock.advance_millis(6 * MINUTE);
        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        assert_eq!(supplier.get_blocking().unwrap(), "value-1");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while supplier.cached().unwrap().value() != "value-2" {
            assert!(std::time::Instant::now() < deadline, "prefetch never landed");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(supplier.get_blocking().unwrap(), "value-2");
        assert_eq!(refresh.calls(), 2);
    }

    #[test]
    fn test_failed_prefetch_backs_off() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.prefetch_in = Some(5 * MINUTE);
        scripted.fail_from = Some(2);
        let refresh = Arc::new(scripted);
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Strict);

        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        clock.advance_millis(6 * MINUTE);
        for _ in 0..5 {
            assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        }
        assert_eq!(refresh.calls(), 2);

        let cached = supplier.cached().unwrap();
        assert!(cached.prefetch_time() > clock.now_millis());
        assert!(cached.prefetch_time() <= cached.stale_time());
    }

    #[test]
    fn test_fresh_result_with_due_prefetch_is_not_prefetched_again() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.prefetch_in = Some(-10 * MINUTE);
        let refresh = Arc::new(scripted);
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Strict);

        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        assert_eq!(refresh.calls(), 1);
        assert_eq!(supplier.cached().unwrap().prefetch_time(), NOW + 5 * MINUTE);
    }

    #[test]
    fn test_allow_stale_keeps_serving_last_value() {
        init_tracing();
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.fail_from = Some(2);
        let refresh = Arc::new(scripted);
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Allow);

        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        clock.advance_millis(11 * MINUTE);

        for attempt in 0..10 {
            assert_eq!(supplier.get_blocking().unwrap(), "value-1");
            let cached = supplier.cached().unwrap();
            let window = cached.stale_time() - clock.now_millis();
            assert!(window >= 1_000, "attempt {} window {}", attempt, window);
            clock.advance_millis(window);
        }
        assert_eq!(refresh.calls(), 11);
    }

    #[tokio::test]
    async fn test_allow_stale_async() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.fail_from = Some(2);
        let refresh = Arc::new(scripted);
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Allow);

        assert_eq!(supplier.get().await.unwrap(), "value-1");
        clock.advance_millis(11 * MINUTE);
        assert_eq!(supplier.get().await.unwrap(), "value-1");
        assert_eq!(supplier.get().await.unwrap(), "value-1");
        assert_eq!(refresh.calls(), 2);
    }

    #[test]
    fn test_strict_without_cache_fails() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.fail_from = Some(1);
        let refresh = Arc::new(scripted);
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Strict);

        let err = supplier.get_blocking().unwrap_err();
        assert!(matches!(err, Error::Credential { .. }));
        assert!(supplier.cached().is_none());
    }

    #[tokio::test]
    async fn test_strict_with_stale_cache_fails() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.fail_from = Some(2);
        let refresh = Arc::new(scripted);
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Strict);

        assert_eq!(supplier.get().await.unwrap(), "value-1");
        clock.advance_millis(11 * MINUTE);
        let err = supplier.get().await.unwrap_err();
        assert_eq!(err.to_string(), "refresh 2 failed");
    }

    #[test]
    fn test_already_stale_refresh_without_cache() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.stale_in = -MINUTE;
        let refresh = Arc::new(scripted);
        let supplier = supplier(&refresh, &clock, StaleValueBehavior::Strict);

        let err = supplier.get_blocking().unwrap_err();
        assert_eq!(err.to_string(), "No cached value was found.");
    }
}

// =============================================================================
// Refresh lock wait
// =============================================================================

mod lock_wait_tests {
    use super::*;

    const SLOW_REFRESH: Duration = Duration::from_millis(5_600);

    #[test]
    fn test_wait_timeout_without_cache_fails() {
        init_tracing();
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.delay = SLOW_REFRESH;
        let refresh = Arc::new(scripted);
        let supplier = Arc::new(supplier(&refresh, &clock, StaleValueBehavior::Strict));

        let slow = {
            let supplier = Arc::clone(&supplier);
            std::thread::spawn(move || supplier.get_blocking())
        };
        std::thread::sleep(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = supplier.get_blocking().unwrap_err();
        assert!(started.elapsed() >= REFRESH_BLOCKING_MAX_WAIT - Duration::from_millis(50));
        assert!(matches!(err, Error::Credential { .. }));
        assert_eq!(err.to_string(), "No cached value was found.");

        assert_eq!(slow.join().unwrap().unwrap(), "value-1");
        assert_eq!(refresh.calls(), 1);
    }

    #[test]
    fn test_wait_timeout_serves_cached_value() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.delay = SLOW_REFRESH;
        scripted.slow_from = 2;
        let refresh = Arc::new(scripted);
        let supplier = Arc::new(supplier(&refresh, &clock, StaleValueBehavior::Strict));

        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        clock.advance_millis(11 * MINUTE);

        let slow = {
            let supplier = Arc::clone(&supplier);
            std::thread::spawn(move || supplier.get_blocking())
        };
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(supplier.get_blocking().unwrap(), "value-1");
        assert_eq!(slow.join().unwrap().unwrap(), "value-2");
        assert_eq!(refresh.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_wait_timeout_without_cache_fails() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.delay = Duration::from_secs(6);
        let refresh = Arc::new(scripted);
        let supplier = Arc::new(supplier(&refresh, &clock, StaleValueBehavior::Strict));

        let slow = {
            let supplier = Arc::clone(&supplier);
            tokio::spawn(async move { supplier.get().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(refresh.calls(), 1);

        let started = tokio::time::Instant::now();
        let err = supplier.get().await.unwrap_err();
        assert!(started.elapsed() >= REFRESH_BLOCKING_MAX_WAIT);
        assert_eq!(err.to_string(), "No cached value was found.");

        assert_eq!(slow.await.unwrap().unwrap(), "value-1");
        assert_eq!(refresh.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_wait_timeout_serves_cached_value() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut scripted = ScriptedRefresh::new(&clock);
        scripted.delay = Duration::from_secs(6);
        scripted.slow_from = 2;
        let refresh = Arc::new(scripted);
        let supplier = Arc::new(supplier(&refresh, &clock, StaleValueBehavior::Strict));

        assert_eq!(supplier.get().await.unwrap(), "value-1");
        clock.advance_millis(11 * MINUTE);

        let slow = {
            let supplier = Arc::clone(&supplier);
            tokio::spawn(async move { supplier.get().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(refresh.calls(), 2);

        assert_eq!(supplier.get().await.unwrap(), "value-1");
        assert_eq!(slow.await.unwrap().unwrap(), "value-2");
    }
}

// =============================================================================
// Default chain
// =============================================================================

mod chain_tests {
    use super::*;
    use alibabacloud_credentials::DefaultCredentialsProvider;

    struct SwitchProvider {
        name: &'static str,
        succeed: AtomicBool,
        calls: AtomicUsize,
    }

    impl SwitchProvider {
        fn new(name: &'static str, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                succeed: AtomicBool::new(succeed),
                calls: AtomicUsize::new(0),
            })
        }

        fn resolve(&self) -> Result<CredentialModel> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed.load(Ordering::SeqCst) {
                Ok(CredentialModel::access_key(self.name, "secret", self.name))
            } else {
                Err(Error::credential(format!("{} unavailable", self.name)))
            }
        }
    }

    #[async_trait]
    impl CredentialsProvider for SwitchProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn get_credentials(&self) -> Result<CredentialModel> {
            self.resolve()
        }

        fn get_credentials_blocking(&self) -> Result<CredentialModel> {
            self.resolve()
        }
    }

    fn chain(
        providers: &[Arc<SwitchProvider>],
        reuse: bool,
    ) -> DefaultCredentialsProvider {
        DefaultCredentialsProvider::from_providers(
            providers
                .iter()
                .map(|p| p.clone() as Arc<dyn CredentialsProvider>)
                .collect(),
            reuse,
        )
    }

    #[tokio::test]
    async fn test_falls_back_to_third_provider() {
        let providers = [
            SwitchProvider::new("first", false),
            SwitchProvider::new("second", false),
            SwitchProvider::new("third", true),
        ];
        let chain = chain(&providers, true);

        let cred = chain.get_credentials().await.unwrap();
        assert_eq!(cred.access_key_id.as_deref(), Some("third"));
        assert_eq!(cred.provider_name, "default/third");
        assert_eq!(chain.last_used_provider().unwrap().name(), "third");
    }

    #[test]
    fn test_reuses_last_provider() {
        let providers = [
            SwitchProvider::new("first", false),
            SwitchProvider::new("second", false),
            SwitchProvider::new("third", true),
        ];
        let chain = chain(&providers, true);

        chain.get_credentials_blocking().unwrap();
        providers[0].succeed.store(true, Ordering::SeqCst);

        let cred = chain.get_credentials_blocking().unwrap();
        assert_eq!(cred.access_key_id.as_deref(), Some("third"));
        assert_eq!(providers[0].calls.load(Ordering::SeqCst), 1);
        assert_eq!(providers[2].calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_walks_again_without_reuse() {
        let providers = [
            SwitchProvider::new("first", false),
            SwitchProvider::new("second", true),
        ];
        let chain = chain(&providers, false);

        chain.get_credentials_blocking().unwrap();
        providers[0].succeed.store(true, Ordering::SeqCst);

        let cred = chain.get_credentials_blocking().unwrap();
        assert_eq!(cred.access_key_id.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_exhaustion_aggregates_errors() {
        let providers = [
            SwitchProvider::new("first", false),
            SwitchProvider::new("second", false),
        ];
        let err = chain(&providers, true).get_credentials().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "not found credentials: [first: first unavailable, second: second unavailable]"
        );
    }
}
