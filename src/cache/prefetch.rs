//! Background refresh strategies.
//!
//! A prefetch is requested when a cached value is still servable but due
//! for refresh. Both strategies allow one in-flight prefetch per instance;
//! a request arriving while one runs is dropped, not queued. Failures are
//! logged here because no caller waits on them.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::Result;

/// Refresh work handed to a strategy from the blocking channel.
pub type PrefetchTask = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Refresh work handed to a strategy from the async channel.
pub type PrefetchFuture = BoxFuture<'static, Result<()>>;

/// Default permit count for [`NonBlocking`].
pub const DEFAULT_MAX_CONCURRENT_REFRESHES: usize = 100;

/// How a background refresh is run.
#[async_trait]
pub trait PrefetchStrategy: Send + Sync + Debug {
    fn prefetch(&self, task: PrefetchTask);

    async fn prefetch_async(&self, task: PrefetchFuture);

    /// Whether a prefetch started by this strategy is still running.
    fn is_refreshing(&self) -> bool;
}

/// Idle/refreshing bit, cleared when the guard drops (including on panic).
#[derive(Debug, Default, Clone)]
struct RefreshingFlag(Arc<AtomicBool>);

impl RefreshingFlag {
    fn try_begin(&self) -> Option<RefreshingGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshingGuard(Arc::clone(&self.0)))
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct RefreshingGuard(Arc<AtomicBool>);

impl Drop for RefreshingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The caller that wins the refreshing bit performs the refresh inline;
/// concurrent callers return immediately.
#[derive(Debug, Default)]
pub struct OneCallerBlocks {
    refreshing: RefreshingFlag,
}

impl OneCallerBlocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrefetchStrategy for OneCallerBlocks {
    fn prefetch(&self, task: PrefetchTask) {
        let Some(_guard) = self.refreshing.try_begin() else {
            return;
        };
        if let Err(e) = task() {
            tracing::warn!(error = %e, "Credentials prefetch failed");
        }
    }

    async fn prefetch_async(&self, task: PrefetchFuture) {
        let Some(_guard) = self.refreshing.try_begin() else {
            return;
        };
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Credentials prefetch failed");
        }
    }

    fn is_refreshing(&self) -> bool {
        self.refreshing.is_set()
    }
}

/// Refreshes on a separate thread (blocking channel) or tokio task (async
/// channel) so no caller waits.
///
/// Concurrent background refreshes are bounded by a semaphore; when no
/// permit is free the prefetch is skipped. The semaphore can be shared
/// between instances to bound refreshes across many providers.
#[derive(Debug)]
pub struct NonBlocking {
    refreshing: RefreshingFlag,
    permits: Arc<Semaphore>,
}

impl NonBlocking {
    pub fn new() -> Self {
        Self::with_max_concurrency(DEFAULT_MAX_CONCURRENT_REFRESHES)
    }

    pub fn with_max_concurrency(max_concurrent_refreshes: usize) -> Self {
        Self::with_shared_permits(Arc::new(Semaphore::new(max_concurrent_refreshes)))
    }

    pub fn with_shared_permits(permits: Arc<Semaphore>) -> Self {
        Self {
            refreshing: RefreshingFlag::default(),
            permits,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    fn begin(&self) -> Option<(RefreshingGuard, OwnedSemaphorePermit)> {
        let guard = self.refreshing.try_begin()?;
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Some((guard, permit)),
            Err(_) => {
                tracing::warn!(
                    "Skipping credentials prefetch: concurrent refresh limit reached"
                );
                None
            }
        }
    }
}

impl Default for NonBlocking {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrefetchStrategy for NonBlocking {
    fn prefetch(&self, task: PrefetchTask) {
        let Some((guard, permit)) = self.begin() else {
            return;
        };

        let spawned = std::thread::Builder::new()
            .name("credentials-prefetch".into())
            .spawn(move || {
                let _guard = guard;
                let _permit = permit;
                if let Err(e) = task() {
                    tracing::warn!(error = %e, "Background credentials refresh failed");
                }
            });

        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Failed to spawn credentials prefetch thread");
        }
    }

    async fn prefetch_async(&self, task: PrefetchFuture) {
        let Some((guard, permit)) = self.begin() else {
            return;
        };

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background credentials refresh failed");
            }
        });
    }

    fn is_refreshing(&self) -> bool {
        self.refreshing.is_set()
    }
}
