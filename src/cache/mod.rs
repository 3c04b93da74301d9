//! Credential caching and refresh engine.
//!
//! [`RefreshCachedSupplier`] serves a cached value, refreshing it in one of
//! three ways depending on the clock:
//! - not yet due: returned as-is;
//! - past its prefetch time: returned as-is while a [`PrefetchStrategy`]
//!   refreshes in the background;
//! - past its stale time: refreshed under a single-flight lock before it
//!   is returned.

mod jitter;
mod prefetch;
mod result;
mod supplier;

pub use jitter::{jitter_time, max_stale_failure_jitter};
pub use prefetch::{
    DEFAULT_MAX_CONCURRENT_REFRESHES, NonBlocking, OneCallerBlocks, PrefetchFuture,
    PrefetchStrategy, PrefetchTask,
};
pub use result::RefreshResult;
pub use supplier::{
    REFRESH_BLOCKING_MAX_WAIT, Refresh, RefreshCachedSupplier, StaleValueBehavior,
    SupplierOptions, handle_fetched_failure, handle_fetched_success,
};
