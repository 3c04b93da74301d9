//! Credential types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Kind of credential, also used as the `type` tag in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    AccessKey,
    Sts,
    EcsRamRole,
    RamRoleArn,
    RsaKeyPair,
    OidcRoleArn,
    CredentialsUri,
    Bearer,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::AccessKey => "access_key",
            CredentialType::Sts => "sts",
            CredentialType::EcsRamRole => "ecs_ram_role",
            CredentialType::RamRoleArn => "ram_role_arn",
            CredentialType::RsaKeyPair => "rsa_key_pair",
            CredentialType::OidcRoleArn => "oidc_role_arn",
            CredentialType::CredentialsUri => "credentials_uri",
            CredentialType::Bearer => "bearer",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "access_key" => Ok(CredentialType::AccessKey),
            "sts" => Ok(CredentialType::Sts),
            "ecs_ram_role" => Ok(CredentialType::EcsRamRole),
            "ram_role_arn" => Ok(CredentialType::RamRoleArn),
            "rsa_key_pair" => Ok(CredentialType::RsaKeyPair),
            "oidc_role_arn" => Ok(CredentialType::OidcRoleArn),
            "credentials_uri" => Ok(CredentialType::CredentialsUri),
            "bearer" => Ok(CredentialType::Bearer),
            other => Err(Error::config(format!("unsupported credential type '{}'", other))),
        }
    }
}

/// Resolved credential. Created fresh by every successful refresh and never
/// mutated afterwards.
#[derive(Clone)]
pub struct CredentialModel {
    pub access_key_id: Option<String>,
    access_key_secret: Option<SecretString>,
    security_token: Option<SecretString>,
    bearer_token: Option<SecretString>,
    pub credential_type: CredentialType,
    /// Expiration in epoch millis; `None` never expires.
    pub expiration: Option<i64>,
    /// Which provider produced this credential, `outer/inner` when chained.
    pub provider_name: String,
}

impl CredentialModel {
    /// Long-lived AccessKey pair.
    pub fn access_key(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: Some(access_key_id.into()),
            access_key_secret: Some(SecretString::from(access_key_secret.into())),
            security_token: None,
            bearer_token: None,
            credential_type: CredentialType::AccessKey,
            expiration: None,
            provider_name: provider_name.into(),
        }
    }

    /// STS AccessKey pair plus security token.
    pub fn sts(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        security_token: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            security_token: Some(SecretString::from(security_token.into())),
            credential_type: CredentialType::Sts,
            ..Self::access_key(access_key_id, access_key_secret, provider_name)
        }
    }

    /// Bearer token.
    pub fn bearer(bearer_token: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            access_key_id: None,
            access_key_secret: None,
            security_token: None,
            bearer_token: Some(SecretString::from(bearer_token.into())),
            credential_type: CredentialType::Bearer,
            expiration: None,
            provider_name: provider_name.into(),
        }
    }

    pub fn with_type(mut self, credential_type: CredentialType) -> Self {
        self.credential_type = credential_type;
        self
    }

    pub fn with_expiration(mut self, expiration_millis: i64) -> Self {
        self.expiration = (expiration_millis > 0).then_some(expiration_millis);
        self
    }

    /// Prefix the provenance with the wrapping provider's name.
    pub fn with_provider_name(mut self, outer: &str) -> Self {
        self.provider_name = format!("{}/{}", outer, self.provider_name);
        self
    }

    pub fn access_key_secret(&self) -> Option<&str> {
        self.access_key_secret.as_ref().map(|s| s.expose_secret())
    }

    pub fn security_token(&self) -> Option<&str> {
        self.security_token.as_ref().map(|s| s.expose_secret())
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_ref().map(|s| s.expose_secret())
    }

    pub fn expiration_datetime(&self) -> Option<DateTime<Utc>> {
        self.expiration.and_then(DateTime::from_timestamp_millis)
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expiration.is_some_and(|exp| now_millis >= exp)
    }
}

impl fmt::Debug for CredentialModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialModel")
            .field("access_key_id", &self.access_key_id)
            .field(
                "access_key_secret",
                &self.access_key_secret.as_ref().map(|_| "[redacted]"),
            )
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "[redacted]"),
            )
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[redacted]"),
            )
            .field("credential_type", &self.credential_type)
            .field("expiration", &self.expiration_datetime())
            .field("provider_name", &self.provider_name)
            .finish()
    }
}
