//! Bridge from a session-credential source to the refresh cache.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::Result;
use crate::cache::{
    NonBlocking, OneCallerBlocks, PrefetchStrategy, Refresh, RefreshCachedSupplier,
    RefreshResult, StaleValueBehavior, SupplierOptions,
};
use crate::credential::CredentialModel;
use crate::provider::CredentialsProvider;
use crate::time::{SystemClock, TimeSource};

const STALE_BEFORE_EXPIRATION_MS: i64 = 15 * 60 * 1000;
const NO_EXPIRATION_STALE_MS: i64 = 60 * 60 * 1000;
const PREFETCH_BEFORE_STALE_MS: i64 = 5 * 60 * 1000;

/// Cache behaviour shared by every refreshing provider.
#[derive(Clone)]
pub struct SessionOptions {
    /// Refresh in the background ([`NonBlocking`]) instead of on the caller
    /// that notices the prefetch time ([`OneCallerBlocks`]). Defaults to
    /// `false`.
    pub async_update_enabled: bool,
    /// Defaults to [`StaleValueBehavior::Strict`].
    pub stale_value_behavior: StaleValueBehavior,
    /// Defaults to `true`.
    pub jitter_enabled: bool,
    /// Permits shared between [`NonBlocking`] instances; each provider gets
    /// its own pool when unset.
    pub prefetch_permits: Option<Arc<Semaphore>>,
    /// Defaults to [`SystemClock`].
    pub clock: Arc<dyn TimeSource>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            async_update_enabled: false,
            stale_value_behavior: StaleValueBehavior::Strict,
            jitter_enabled: true,
            prefetch_permits: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("async_update_enabled", &self.async_update_enabled)
            .field("stale_value_behavior", &self.stale_value_behavior)
            .field("jitter_enabled", &self.jitter_enabled)
            .finish_non_exhaustive()
    }
}

impl SessionOptions {
    fn prefetch_strategy(&self) -> Box<dyn PrefetchStrategy> {
        match (self.async_update_enabled, &self.prefetch_permits) {
            (false, _) => Box::new(OneCallerBlocks::new()),
            (true, Some(permits)) => {
                Box::new(NonBlocking::with_shared_permits(Arc::clone(permits)))
            }
            (true, None) => Box::new(NonBlocking::new()),
        }
    }

    fn supplier_options(&self) -> SupplierOptions {
        SupplierOptions {
            prefetch_strategy: self.prefetch_strategy(),
            stale_value_behavior: self.stale_value_behavior,
            jitter_enabled: self.jitter_enabled,
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Fetches one session credential over the network, without caching.
#[async_trait]
pub trait SessionCredentialsSource: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<CredentialModel>;

    fn fetch_blocking(&self) -> Result<CredentialModel>;
}

/// Fifteen minutes before `expiration`, or an hour from now when the
/// credential does not expire. A credential with less than twice that
/// margin left goes stale halfway through its remaining lifetime.
pub fn stale_time(expiration: Option<i64>, now: i64) -> i64 {
    match expiration {
        Some(exp) if exp > now && exp - now < 2 * STALE_BEFORE_EXPIRATION_MS => {
            now + (exp - now) / 2
        }
        Some(exp) => exp - STALE_BEFORE_EXPIRATION_MS,
        None => now + NO_EXPIRATION_STALE_MS,
    }
}

/// Five minutes before the stale time, or five minutes from now when the
/// credential does not expire.
pub fn prefetch_time(expiration: Option<i64>, now: i64) -> i64 {
    match expiration {
        Some(_) => stale_time(expiration, now) - PREFETCH_BEFORE_STALE_MS,
        None => now + PREFETCH_BEFORE_STALE_MS,
    }
}

struct SessionRefresh<S> {
    source: Arc<S>,
    clock: Arc<dyn TimeSource>,
}

impl<S: SessionCredentialsSource> SessionRefresh<S> {
    fn schedule(&self, credential: CredentialModel) -> RefreshResult<CredentialModel> {
        let now = self.clock.now_millis();
        tracing::info!(
            provider = %credential.provider_name,
            expiration = ?credential.expiration_datetime(),
            "Refreshed session credentials"
        );
        let stale = stale_time(credential.expiration, now);
        let prefetch = prefetch_time(credential.expiration, now);
        RefreshResult::new(credential, stale).with_prefetch_time(prefetch)
    }
}

#[async_trait]
impl<S: SessionCredentialsSource> Refresh<CredentialModel> for SessionRefresh<S> {
    fn refresh_blocking(&self) -> Result<RefreshResult<CredentialModel>> {
        let credential = self.source.fetch_blocking()?;
        Ok(self.schedule(credential))
    }

    async fn refresh(&self) -> Result<RefreshResult<CredentialModel>> {
        let credential = self.source.fetch().await?;
        Ok(self.schedule(credential))
    }
}

/// Serves credentials from `S` through a [`RefreshCachedSupplier`].
pub struct SessionCredentialsProvider<S> {
    source: Arc<S>,
    supplier: RefreshCachedSupplier<CredentialModel>,
}

impl<S: SessionCredentialsSource> SessionCredentialsProvider<S> {
    pub fn new(source: S, options: &SessionOptions) -> Self {
        let source = Arc::new(source);
        let refresh = Arc::new(SessionRefresh {
            source: Arc::clone(&source),
            clock: Arc::clone(&options.clock),
        });
        Self {
            source,
            supplier: RefreshCachedSupplier::new(refresh, options.supplier_options()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn supplier(&self) -> &RefreshCachedSupplier<CredentialModel> {
        &self.supplier
    }
}

impl<S> fmt::Debug for SessionCredentialsProvider<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentialsProvider")
            .field("supplier", &self.supplier)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: SessionCredentialsSource> CredentialsProvider for SessionCredentialsProvider<S> {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn get_credentials(&self) -> Result<CredentialModel> {
        self.supplier.get().await
    }

    fn get_credentials_blocking(&self) -> Result<CredentialModel> {
        self.supplier.get_blocking()
    }
}
