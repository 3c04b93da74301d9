//! Entry point that turns a [`Config`] into a credentials provider.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::env::{OIDC_PROVIDER_ARN, OIDC_TOKEN_FILE, ROLE_ARN};
use crate::config::{Config, Environment};
use crate::credential::{CredentialModel, CredentialType};
use crate::http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, HttpClient, ReqwestHttpClient};
use crate::provider::CredentialsProvider;
use crate::providers::{
    BearerTokenCredentialsProvider, DefaultCredentialsProvider, DefaultProviderOptions,
    EcsRamRoleConfig, EcsRamRoleCredentialsProvider, OidcRoleArnConfig,
    OidcRoleArnCredentialsProvider, RamRoleArnConfig, RamRoleArnCredentialsProvider,
    StaticAkCredentialsProvider, StaticStsCredentialsProvider, UriCredentialsConfig,
    UriCredentialsProvider,
};
use crate::{Error, Result};

/// Credentials client.
///
/// The blocking accessor must not be called from inside an async runtime
/// when the selected provider performs network I/O.
#[derive(Clone)]
pub struct Client {
    provider: Arc<dyn CredentialsProvider>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl Client {
    /// Provider for `config`, reading the process environment and using the
    /// reqwest transport.
    pub fn new(config: Config) -> Result<Self> {
        Self::from_parts(
            config,
            &Environment::from_process(),
            Arc::new(ReqwestHttpClient::new()?),
        )
    }

    pub fn from_parts(
        config: Config,
        env: &Environment,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        Ok(Self {
            provider: build_provider(config, env, http)?,
        })
    }

    pub fn with_provider(provider: Arc<dyn CredentialsProvider>) -> Self {
        Self { provider }
    }

    pub async fn credential(&self) -> Result<CredentialModel> {
        self.provider.get_credentials().await
    }

    pub fn credential_blocking(&self) -> Result<CredentialModel> {
        self.provider.get_credentials_blocking()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn provider(&self) -> &Arc<dyn CredentialsProvider> {
        &self.provider
    }
}

fn required(value: Option<String>, field: &str, credential_type: CredentialType) -> Result<String> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        Error::config(format!(
            "{} is required for {} credentials",
            field, credential_type
        ))
    })
}

fn build_provider(
    config: Config,
    env: &Environment,
    http: Arc<dyn HttpClient>,
) -> Result<Arc<dyn CredentialsProvider>> {
    let Some(credential_type) = config.credential_type else {
        return Ok(Arc::new(DefaultCredentialsProvider::new(
            env,
            http,
            DefaultProviderOptions {
                session: config.session,
                ..Default::default()
            },
        )?));
    };

    let connect_timeout = config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
    let read_timeout = config.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT);

    let provider: Arc<dyn CredentialsProvider> = match credential_type {
        CredentialType::AccessKey => Arc::new(StaticAkCredentialsProvider::new(
            required(config.access_key_id, "access_key_id", credential_type)?,
            required(config.access_key_secret, "access_key_secret", credential_type)?,
        )?),
        CredentialType::Sts => Arc::new(StaticStsCredentialsProvider::new(
            required(config.access_key_id, "access_key_id", credential_type)?,
            required(config.access_key_secret, "access_key_secret", credential_type)?,
            required(config.security_token, "security_token", credential_type)?,
        )?),
        CredentialType::Bearer => Arc::new(BearerTokenCredentialsProvider::new(required(
            config.bearer_token,
            "bearer_token",
            credential_type,
        )?)?),
        CredentialType::RamRoleArn => {
            let id = required(config.access_key_id, "access_key_id", credential_type)?;
            let secret = required(config.access_key_secret, "access_key_secret", credential_type)?;
            let source: Arc<dyn CredentialsProvider> = match config.security_token {
                Some(token) => Arc::new(StaticStsCredentialsProvider::new(id, secret, token)?),
                None => Arc::new(StaticAkCredentialsProvider::new(id, secret)?),
            };

            let mut ram = RamRoleArnConfig {
                role_arn: required(
                    config.role_arn.or_else(|| env.var(ROLE_ARN).map(str::to_string)),
                    "role_arn",
                    credential_type,
                )?,
                policy: config.policy,
                external_id: config.external_id,
                sts_region_id: config.sts_region_id,
                sts_endpoint: config.sts_endpoint,
                enable_vpc: config.enable_vpc.unwrap_or(false),
                connect_timeout,
                read_timeout,
                session: config.session,
                ..Default::default()
            };
            if let Some(name) = config.role_session_name {
                ram.role_session_name = name;
            }
            if let Some(duration) = config.duration_seconds {
                ram.duration_seconds = duration;
            }
            Arc::new(RamRoleArnCredentialsProvider::with_http_client(source, ram, http)?)
        }
        CredentialType::OidcRoleArn => {
            let mut oidc = OidcRoleArnConfig {
                role_arn: required(
                    config.role_arn.or_else(|| env.var(ROLE_ARN).map(str::to_string)),
                    "role_arn",
                    credential_type,
                )?,
                oidc_provider_arn: required(
                    config
                        .oidc_provider_arn
                        .or_else(|| env.var(OIDC_PROVIDER_ARN).map(str::to_string)),
                    "oidc_provider_arn",
                    credential_type,
                )?,
                oidc_token_file_path: match config.oidc_token_file_path {
                    Some(path) => path,
                    None => PathBuf::from(required(
                        env.var(OIDC_TOKEN_FILE).map(str::to_string),
                        "oidc_token_file_path",
                        credential_type,
                    )?),
                },
                policy: config.policy,
                sts_region_id: config.sts_region_id,
                sts_endpoint: config.sts_endpoint,
                enable_vpc: config.enable_vpc.unwrap_or(false),
                connect_timeout,
                read_timeout,
                session: config.session,
                ..Default::default()
            };
            if let Some(name) = config.role_session_name {
                oidc.role_session_name = name;
            }
            if let Some(duration) = config.duration_seconds {
                oidc.duration_seconds = duration;
            }
            Arc::new(OidcRoleArnCredentialsProvider::with_http_client(oidc, http)?)
        }
        CredentialType::EcsRamRole => {
            let from_env = EcsRamRoleConfig::from_env(env);
            Arc::new(EcsRamRoleCredentialsProvider::with_http_client(
                EcsRamRoleConfig {
                    role_name: config.role_name.or(from_env.role_name),
                    disable_imds_v1: config.disable_imds_v1.unwrap_or(from_env.disable_imds_v1),
                    connect_timeout,
                    read_timeout,
                    session: config.session,
                    ..Default::default()
                },
                http,
            )?)
        }
        CredentialType::CredentialsUri => Arc::new(UriCredentialsProvider::with_http_client(
            UriCredentialsConfig {
                credentials_uri: required(
                    config
                        .credentials_uri
                        .or_else(|| UriCredentialsConfig::from_env(env).map(|c| c.credentials_uri)),
                    "credentials_uri",
                    credential_type,
                )?,
                connect_timeout,
                read_timeout,
                session: config.session,
            },
            http,
        )?),
        CredentialType::RsaKeyPair => {
            return Err(Error::config("rsa_key_pair credentials are not supported"));
        }
    };

    tracing::debug!(provider = %provider.name(), "Credentials client configured");
    Ok(provider)
}
