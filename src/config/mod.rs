//! Client configuration.
//!
//! [`Config`] carries every credential-source parameter in one plain struct.
//! `credential_type` selects the provider [`crate::Client`] builds; leaving it
//! unset selects the default chain. Fields that do not apply to the selected
//! type are ignored.
//!
//! ```rust,no_run
//! use alibabacloud_credentials::{Client, Config, CredentialType};
//!
//! # fn example() -> alibabacloud_credentials::Result<()> {
//! let client = Client::new(Config {
//!     credential_type: Some(CredentialType::RamRoleArn),
//!     access_key_id: Some("ak".into()),
//!     access_key_secret: Some("secret".into()),
//!     role_arn: Some("acs:ram::123456:role/deploy".into()),
//!     ..Default::default()
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod env;

pub use env::Environment;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::credential::CredentialType;
use crate::providers::SessionOptions;

/// Parameters for every credential source.
///
/// Unset optional fields fall back to the defaults of the provider config
/// they feed: `duration_seconds` 3600, `connect_timeout` and `read_timeout`
/// 1000ms, `role_session_name` `credentials-rust-<epoch millis>`, STS
/// endpoint derived from `sts_region_id` and `enable_vpc`.
#[derive(Clone, Default)]
pub struct Config {
    /// Provider to build; `None` builds the default chain.
    pub credential_type: Option<CredentialType>,

    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    pub security_token: Option<String>,
    pub bearer_token: Option<String>,

    pub role_arn: Option<String>,
    pub role_session_name: Option<String>,
    pub policy: Option<String>,
    pub duration_seconds: Option<u32>,
    pub external_id: Option<String>,
    pub sts_region_id: Option<String>,
    pub sts_endpoint: Option<String>,
    pub enable_vpc: Option<bool>,

    pub oidc_provider_arn: Option<String>,
    pub oidc_token_file_path: Option<PathBuf>,

    /// ECS RAM role; discovered from instance metadata when unset.
    pub role_name: Option<String>,
    pub disable_imds_v1: Option<bool>,

    pub credentials_uri: Option<String>,

    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,

    /// Cache behaviour for the refreshing providers.
    pub session: SessionOptions,
}

impl Config {
    pub fn access_key(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        Self {
            credential_type: Some(CredentialType::AccessKey),
            access_key_id: Some(access_key_id.into()),
            access_key_secret: Some(access_key_secret.into()),
            ..Default::default()
        }
    }

    pub fn sts(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        security_token: impl Into<String>,
    ) -> Self {
        Self {
            credential_type: Some(CredentialType::Sts),
            security_token: Some(security_token.into()),
            ..Self::access_key(access_key_id, access_key_secret)
        }
    }

    pub fn bearer(bearer_token: impl Into<String>) -> Self {
        Self {
            credential_type: Some(CredentialType::Bearer),
            bearer_token: Some(bearer_token.into()),
            ..Default::default()
        }
    }
}

fn redact(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "[redacted]")
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("credential_type", &self.credential_type)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &redact(&self.access_key_secret))
            .field("security_token", &redact(&self.security_token))
            .field("bearer_token", &redact(&self.bearer_token))
            .field("role_arn", &self.role_arn)
            .field("role_session_name", &self.role_session_name)
            .field("duration_seconds", &self.duration_seconds)
            .field("sts_region_id", &self.sts_region_id)
            .field("sts_endpoint", &self.sts_endpoint)
            .field("enable_vpc", &self.enable_vpc)
            .field("oidc_provider_arn", &self.oidc_provider_arn)
            .field("oidc_token_file_path", &self.oidc_token_file_path)
            .field("role_name", &self.role_name)
            .field("disable_imds_v1", &self.disable_imds_v1)
            .field("credentials_uri", &self.credentials_uri)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_type() {
        let config = Config::sts("ak", "secret", "token");
        assert_eq!(config.credential_type, Some(CredentialType::Sts));
        assert_eq!(config.access_key_id.as_deref(), Some("ak"));
        assert_eq!(config.security_token.as_deref(), Some("token"));

        assert_eq!(
            Config::bearer("bt").credential_type,
            Some(CredentialType::Bearer)
        );
        assert_eq!(Config::default().credential_type, None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::sts("ak", "very-secret", "very-token");
        let debug = format!("{:?}", config);
        assert!(debug.contains("\"ak\""));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("very-token"));
    }
}
