//! Static credential providers.

use async_trait::async_trait;

use crate::credential::CredentialModel;
use crate::provider::CredentialsProvider;
use crate::{Error, Result};

fn require(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::config(format!("{} must not be empty", field)));
    }
    Ok(value)
}

/// Long-lived AccessKey pair.
#[derive(Debug, Clone)]
pub struct StaticAkCredentialsProvider {
    credential: CredentialModel,
}

impl StaticAkCredentialsProvider {
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Result<Self> {
        let id = require("access_key_id", access_key_id.into())?;
        let secret = require("access_key_secret", access_key_secret.into())?;
        Ok(Self {
            credential: CredentialModel::access_key(id, secret, "static_ak"),
        })
    }
}

#[async_trait]
impl CredentialsProvider for StaticAkCredentialsProvider {
    fn name(&self) -> &str {
        "static_ak"
    }

    async fn get_credentials(&self) -> Result<CredentialModel> {
        Ok(self.credential.clone())
    }

    fn get_credentials_blocking(&self) -> Result<CredentialModel> {
        Ok(self.credential.clone())
    }
}

/// Fixed STS token. Never refreshed; callers replace the provider when the
/// token expires.
#[derive(Debug, Clone)]
pub struct StaticStsCredentialsProvider {
    credential: CredentialModel,
}

impl StaticStsCredentialsProvider {
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        security_token: impl Into<String>,
    ) -> Result<Self> {
        let id = require("access_key_id", access_key_id.into())?;
        let secret = require("access_key_secret", access_key_secret.into())?;
        let token = require("security_token", security_token.into())?;
        Ok(Self {
            credential: CredentialModel::sts(id, secret, token, "static_sts"),
        })
    }
}

#[async_trait]
impl CredentialsProvider for StaticStsCredentialsProvider {
    fn name(&self) -> &str {
        "static_sts"
    }

    async fn get_credentials(&self) -> Result<CredentialModel> {
        Ok(self.credential.clone())
    }

    fn get_credentials_blocking(&self) -> Result<CredentialModel> {
        Ok(self.credential.clone())
    }
}

/// Bearer token, used by products that authenticate with a token instead of
/// a signed AccessKey.
#[derive(Debug, Clone)]
pub struct BearerTokenCredentialsProvider {
    credential: CredentialModel,
}

impl BearerTokenCredentialsProvider {
    pub fn new(bearer_token: impl Into<String>) -> Result<Self> {
        let token = require("bearer_token", bearer_token.into())?;
        Ok(Self {
            credential: CredentialModel::bearer(token, "bearer"),
        })
    }
}

#[async_trait]
impl CredentialsProvider for BearerTokenCredentialsProvider {
    fn name(&self) -> &str {
        "bearer"
    }

    async fn get_credentials(&self) -> Result<CredentialModel> {
        Ok(self.credential.clone())
    }

    fn get_credentials_blocking(&self) -> Result<CredentialModel> {
        Ok(self.credential.clone())
    }
}
