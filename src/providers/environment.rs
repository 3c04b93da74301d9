//! Environment variable credential provider.

use async_trait::async_trait;

use crate::config::Environment;
use crate::config::env::{ACCESS_KEY_ID, ACCESS_KEY_SECRET, SECURITY_TOKEN};
use crate::credential::CredentialModel;
use crate::provider::CredentialsProvider;
use crate::{Error, Result};

/// Reads `ALIBABA_CLOUD_ACCESS_KEY_ID`, `ALIBABA_CLOUD_ACCESS_KEY_SECRET`
/// and the optional `ALIBABA_CLOUD_SECURITY_TOKEN` from an [`Environment`].
#[derive(Debug, Clone)]
pub struct EnvironmentVariableCredentialsProvider {
    env: Environment,
}

impl EnvironmentVariableCredentialsProvider {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }

    fn resolve(&self) -> Result<CredentialModel> {
        let id = self
            .env
            .var(ACCESS_KEY_ID)
            .ok_or_else(|| Error::credential(format!("{} is empty or not set", ACCESS_KEY_ID)))?;
        let secret = self.env.var(ACCESS_KEY_SECRET).ok_or_else(|| {
            Error::credential(format!("{} is empty or not set", ACCESS_KEY_SECRET))
        })?;

        Ok(match self.env.var(SECURITY_TOKEN) {
            Some(token) => CredentialModel::sts(id, secret, token, "env"),
            None => CredentialModel::access_key(id, secret, "env"),
        })
    }
}

#[async_trait]
impl CredentialsProvider for EnvironmentVariableCredentialsProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_credentials(&self) -> Result<CredentialModel> {
        self.resolve()
    }

    fn get_credentials_blocking(&self) -> Result<CredentialModel> {
        self.resolve()
    }
}
