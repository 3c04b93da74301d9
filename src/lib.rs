//! # alibabacloud-credentials
//!
//! Resolves, caches and refreshes Alibaba Cloud access credentials: static
//! AccessKeys, STS tokens, RAM role assumption, OIDC federation, ECS instance
//! metadata roles and credential URIs, tried in order by a default chain.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use alibabacloud_credentials::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), alibabacloud_credentials::Error> {
//!     let client = Client::new(Default::default())?;
//!     let credential = client.credential().await?;
//!     println!("resolved by {}", credential.provider_name);
//!     Ok(())
//! }
//! ```
//!
//! ## Assuming a role
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use alibabacloud_credentials::{
//!     CredentialsProvider, RamRoleArnConfig, RamRoleArnCredentialsProvider,
//!     StaticAkCredentialsProvider,
//! };
//!
//! # async fn example() -> alibabacloud_credentials::Result<()> {
//! let source = StaticAkCredentialsProvider::new("ak", "secret")?;
//! let provider = RamRoleArnCredentialsProvider::new(
//!     Arc::new(source),
//!     RamRoleArnConfig {
//!         role_arn: "acs:ram::123456:role/deploy".into(),
//!         ..Default::default()
//!     },
//! )?;
//! let credential = provider.get_credentials().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod cache;
pub mod client;
pub mod config;
pub mod credential;
pub mod http;
pub mod prelude;
pub mod provider;
pub mod providers;
mod sign;
mod sts;
pub mod time;

pub use cache::{
    NonBlocking, OneCallerBlocks, PrefetchStrategy, Refresh, RefreshCachedSupplier,
    RefreshResult, StaleValueBehavior,
};
pub use client::Client;
pub use config::{Config, Environment};
pub use credential::{CredentialModel, CredentialType};
pub use http::{HttpClient, HttpRequest, HttpResponse, Method, ReqwestHttpClient};
pub use provider::CredentialsProvider;
pub use providers::{
    BearerTokenCredentialsProvider, CliProfileCredentialsProvider, DefaultCredentialsProvider,
    DefaultProviderOptions, EcsRamRoleConfig, EcsRamRoleCredentialsProvider,
    EnvironmentVariableCredentialsProvider, OidcRoleArnConfig, OidcRoleArnCredentialsProvider,
    ProfileCredentialsProvider, RamRoleArnConfig, RamRoleArnCredentialsProvider,
    SessionCredentialsProvider, SessionOptions, StaticAkCredentialsProvider,
    StaticStsCredentialsProvider, UriCredentialsConfig, UriCredentialsProvider,
};
pub use time::{ManualClock, SystemClock, TimeSource};

/// Error type for credential operations.
///
/// Messages name the source that failed and why, so a misconfigured
/// chain can be diagnosed without looking at cache internals.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Credentials could not be produced or no usable cached value exists.
    #[error("{message}")]
    Credential { message: String },

    /// Invalid or missing configuration, raised at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network connectivity or request failed.
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to parse a response or a credentials file.
    #[error("Parse error: {0}")]
    Parse(String),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation exceeded timeout.
    #[error("Operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No credential could be served.
    Credential,
    /// Configuration, parsing, or setup errors
    Configuration,
    /// Network or server-side errors that may succeed on retry
    Transient,
    /// Internal errors (IO, JSON, unexpected states)
    Internal,
}

impl Error {
    pub fn credential(message: impl Into<String>) -> Self {
        Error::Credential {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Credential { .. } => ErrorCategory::Credential,
            Error::Config(_) | Error::Parse(_) => ErrorCategory::Configuration,
            Error::Network(_) | Error::Timeout(_) => ErrorCategory::Transient,
            Error::Http {
                status: 429 | 500..=599,
                ..
            } => ErrorCategory::Transient,
            Error::Http { .. } | Error::Json(_) | Error::Io(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::credential("No cached value was found.").category(),
            ErrorCategory::Credential
        );
        assert!(Error::config("role_arn is required").is_configuration_error());
        assert!(Error::Timeout(std::time::Duration::from_secs(5)).is_retryable());

        let throttled = Error::Http {
            status: 503,
            url: "https://sts.aliyuncs.com".into(),
            body: String::new(),
        };
        assert!(throttled.is_retryable());
        assert_eq!(throttled.status_code(), Some(503));

        let forbidden = Error::Http {
            status: 403,
            url: "https://sts.aliyuncs.com".into(),
            body: "NoPermission".into(),
        };
        assert!(!forbidden.is_retryable());
    }

    #[test]
    fn test_credential_error_display_is_message() {
        let err = Error::credential("not found credentials: [a: b]");
        assert_eq!(err.to_string(), "not found credentials: [a: b]");
    }
}
