//! OIDC federation through STS `AssumeRoleWithOIDC`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::session::{SessionCredentialsProvider, SessionCredentialsSource, SessionOptions};
use crate::config::Environment;
use crate::config::env::{
    OIDC_PROVIDER_ARN, OIDC_TOKEN_FILE, ROLE_ARN, ROLE_SESSION_NAME, STS_REGION,
    VPC_ENDPOINT_ENABLED,
};
use crate::credential::{CredentialModel, CredentialType};
use crate::http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, HttpClient, HttpRequest, Method,
    ReqwestHttpClient,
};
use crate::provider::CredentialsProvider;
use crate::sts::{
    DEFAULT_DURATION_SECONDS, STS_VERSION, default_role_session_name, endpoint_url,
    parse_assume_role, resolve_endpoint, validate_duration,
};
use crate::{Error, Result};

const NAME: &str = "oidc_role_arn";

/// Parameters for [`OidcRoleArnCredentialsProvider`].
#[derive(Clone, Debug)]
pub struct OidcRoleArnConfig {
    /// Required.
    pub role_arn: String,
    /// Required.
    pub oidc_provider_arn: String,
    /// Required; read on every refresh so a rotated token is picked up.
    pub oidc_token_file_path: PathBuf,
    /// Defaults to `credentials-rust-<epoch millis>`.
    pub role_session_name: String,
    pub policy: Option<String>,
    /// Defaults to 3600, at least 900.
    pub duration_seconds: u32,
    pub sts_region_id: Option<String>,
    pub sts_endpoint: Option<String>,
    pub enable_vpc: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub session: SessionOptions,
}

impl Default for OidcRoleArnConfig {
    fn default() -> Self {
        Self {
            role_arn: String::new(),
            oidc_provider_arn: String::new(),
            oidc_token_file_path: PathBuf::new(),
            role_session_name: default_role_session_name(),
            policy: None,
            duration_seconds: DEFAULT_DURATION_SECONDS,
            sts_region_id: None,
            sts_endpoint: None,
            enable_vpc: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            session: SessionOptions::default(),
        }
    }
}

impl OidcRoleArnConfig {
    /// Configuration from `ALIBABA_CLOUD_ROLE_ARN`,
    /// `ALIBABA_CLOUD_OIDC_PROVIDER_ARN` and `ALIBABA_CLOUD_OIDC_TOKEN_FILE`;
    /// `None` unless all three are set.
    pub fn from_env(env: &Environment) -> Option<Self> {
        let role_arn = env.var(ROLE_ARN)?;
        let provider_arn = env.var(OIDC_PROVIDER_ARN)?;
        let token_file = env.var(OIDC_TOKEN_FILE)?;

        let mut config = Self {
            role_arn: role_arn.to_string(),
            oidc_provider_arn: provider_arn.to_string(),
            oidc_token_file_path: PathBuf::from(token_file),
            sts_region_id: env.var(STS_REGION).map(str::to_string),
            enable_vpc: env.flag(VPC_ENDPOINT_ENABLED),
            ..Default::default()
        };
        if let Some(name) = env.var(ROLE_SESSION_NAME) {
            config.role_session_name = name.to_string();
        }
        Some(config)
    }
}

struct AssumeRoleWithOidc {
    config: OidcRoleArnConfig,
    endpoint: String,
    http: Arc<dyn HttpClient>,
}

fn token_from_file(path: &Path, contents: std::io::Result<String>) -> Result<String> {
    let token = contents.map_err(|e| {
        Error::credential(format!(
            "failed to read OIDC token file {}: {}",
            path.display(),
            e
        ))
    })?;
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::credential(format!(
            "OIDC token file {} is empty",
            path.display()
        )));
    }
    Ok(token.to_string())
}

impl AssumeRoleWithOidc {
    /// Anonymous call: common parameters in the query, the rest form-encoded
    /// in the body.
    fn request(&self, token: &str) -> Result<HttpRequest> {
        let config = &self.config;
        let mut url = endpoint_url(&self.endpoint, "https")?;
        url.set_path("/");
        url.query_pairs_mut()
            .append_pair("Action", "AssumeRoleWithOIDC")
            .append_pair("Format", "JSON")
            .append_pair("Version", STS_VERSION)
            .append_pair(
                "Timestamp",
                &Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            );

        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("RoleArn", &config.role_arn)
            .append_pair("OIDCProviderArn", &config.oidc_provider_arn)
            .append_pair("OIDCToken", token)
            .append_pair("RoleSessionName", &config.role_session_name)
            .append_pair("DurationSeconds", &config.duration_seconds.to_string());
        if let Some(policy) = config.policy.as_deref() {
            form.append_pair("Policy", policy);
        }

        Ok(HttpRequest::new(Method::Post, url.to_string())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form.finish())
            .timeouts(config.connect_timeout, config.read_timeout))
    }
}

#[async_trait]
impl SessionCredentialsSource for AssumeRoleWithOidc {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self) -> Result<CredentialModel> {
        let path = &self.config.oidc_token_file_path;
        let token = token_from_file(path, tokio::fs::read_to_string(path).await)?;
        let request = self.request(&token)?;
        let url = request.url.clone();
        tracing::debug!(
            role_arn = %self.config.role_arn,
            endpoint = %self.endpoint,
            "Assuming role with OIDC token"
        );
        let response = self.http.send(request).await?;
        Ok(parse_assume_role(response, &url, NAME)?.with_type(CredentialType::OidcRoleArn))
    }

    fn fetch_blocking(&self) -> Result<CredentialModel> {
        let path = &self.config.oidc_token_file_path;
        let token = token_from_file(path, std::fs::read_to_string(path))?;
        let request = self.request(&token)?;
        let url = request.url.clone();
        tracing::debug!(
            role_arn = %self.config.role_arn,
            endpoint = %self.endpoint,
            "Assuming role with OIDC token"
        );
        let response = self.http.send_blocking(request)?;
        Ok(parse_assume_role(response, &url, NAME)?.with_type(CredentialType::OidcRoleArn))
    }
}

/// Exchanges an OIDC token (for example a Kubernetes service account token)
/// for STS credentials.
#[derive(Debug)]
pub struct OidcRoleArnCredentialsProvider {
    session: SessionCredentialsProvider<AssumeRoleWithOidc>,
}

impl OidcRoleArnCredentialsProvider {
    pub fn new(config: OidcRoleArnConfig) -> Result<Self> {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()?))
    }

    pub fn with_http_client(config: OidcRoleArnConfig, http: Arc<dyn HttpClient>) -> Result<Self> {
        if config.role_arn.trim().is_empty() {
            return Err(Error::config("role_arn is required"));
        }
        if config.oidc_provider_arn.trim().is_empty() {
            return Err(Error::config("oidc_provider_arn is required"));
        }
        if config.oidc_token_file_path.as_os_str().is_empty() {
            return Err(Error::config("oidc_token_file_path is required"));
        }
        validate_duration(config.duration_seconds)?;

        let endpoint = resolve_endpoint(
            config.sts_endpoint.as_deref(),
            config.sts_region_id.as_deref(),
            config.enable_vpc,
        );
        let session_options = config.session.clone();
        Ok(Self {
            session: SessionCredentialsProvider::new(
                AssumeRoleWithOidc {
                    config,
                    endpoint,
                    http,
                },
                &session_options,
            ),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.session.source().endpoint
    }
}

#[async_trait]
impl CredentialsProvider for OidcRoleArnCredentialsProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_credentials(&self) -> Result<CredentialModel> {
        self.session.get_credentials().await
    }

    fn get_credentials_blocking(&self) -> Result<CredentialModel> {
        self.session.get_credentials_blocking()
    }
}
