//! ECS instance RAM role from the instance metadata service.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use super::session::{SessionCredentialsProvider, SessionCredentialsSource, SessionOptions};
use crate::config::Environment;
use crate::config::env::{ECS_METADATA, IMDSV1_DISABLED};
use crate::credential::{CredentialModel, CredentialType};
use crate::http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, HttpClient, HttpRequest, HttpResponse, Method,
    ReqwestHttpClient,
};
use crate::provider::CredentialsProvider;
use crate::sts::{MetadataCredentials, endpoint_url};
use crate::{Error, Result};

const NAME: &str = "ecs_ram_role";
const DEFAULT_METADATA_ENDPOINT: &str = "100.100.100.200";
const TOKEN_PATH: &str = "/latest/api/token";
const CREDENTIALS_PATH: &str = "/latest/meta-data/ram/security-credentials/";
const TOKEN_TTL_HEADER: &str = "X-aliyun-ecs-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aliyun-ecs-metadata-token";

/// Parameters for [`EcsRamRoleCredentialsProvider`].
#[derive(Clone, Debug)]
pub struct EcsRamRoleConfig {
    /// Discovered from the metadata service when unset.
    pub role_name: Option<String>,
    /// Fail instead of falling back to token-less metadata requests.
    pub disable_imds_v1: bool,
    /// Lifetime requested for the metadata session token. Defaults to 6h.
    pub metadata_token_duration: Duration,
    /// Metadata service host or base URL. Defaults to `100.100.100.200`.
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub session: SessionOptions,
}

impl Default for EcsRamRoleConfig {
    fn default() -> Self {
        Self {
            role_name: None,
            disable_imds_v1: false,
            metadata_token_duration: Duration::from_secs(21600),
            endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            session: SessionOptions::default(),
        }
    }
}

impl EcsRamRoleConfig {
    /// Role name from `ALIBABA_CLOUD_ECS_METADATA`, IMDSv1 switch from
    /// `ALIBABA_CLOUD_IMDSV1_DISABLED`.
    pub fn from_env(env: &Environment) -> Self {
        Self {
            role_name: env.var(ECS_METADATA).map(str::to_string),
            disable_imds_v1: env.flag(IMDSV1_DISABLED),
            ..Default::default()
        }
    }
}

struct InstanceMetadata {
    config: EcsRamRoleConfig,
    base_url: String,
    http: Arc<dyn HttpClient>,
    discovered_role: OnceLock<String>,
}

impl std::fmt::Debug for InstanceMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceMetadata")
            .field("base_url", &self.base_url)
            .field("role_name", &self.config.role_name)
            .finish_non_exhaustive()
    }
}

impl InstanceMetadata {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn token_request(&self) -> HttpRequest {
        HttpRequest::new(Method::Put, self.url(TOKEN_PATH))
            .header(
                TOKEN_TTL_HEADER,
                self.config.metadata_token_duration.as_secs().to_string(),
            )
            .timeouts(self.config.connect_timeout, self.config.read_timeout)
    }

    fn get(&self, url: String, token: Option<&str>) -> HttpRequest {
        let request = HttpRequest::new(Method::Get, url)
            .timeouts(self.config.connect_timeout, self.config.read_timeout);
        match token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    /// A missing token is tolerated unless IMDSv1 is disabled.
    fn accept_token(&self, fetched: Result<HttpResponse>) -> Result<Option<String>> {
        let token = fetched.and_then(|response| {
            let url = self.url(TOKEN_PATH);
            Ok(response.error_for_status(&url)?.text())
        });
        match token {
            Ok(token) => Ok(Some(token.trim().to_string())),
            Err(e) if self.config.disable_imds_v1 => Err(Error::credential(format!(
                "Failed to get token from ECS Metadata Service: {}",
                e
            ))),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "ECS metadata token unavailable, falling back to IMDSv1"
                );
                Ok(None)
            }
        }
    }

    fn known_role(&self) -> Option<&str> {
        self.config
            .role_name
            .as_deref()
            .or_else(|| self.discovered_role.get().map(String::as_str))
    }

    fn accept_role(&self, response: HttpResponse) -> Result<String> {
        let url = self.url(CREDENTIALS_PATH);
        let body = response.error_for_status(&url)?.text();
        let role = body
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| Error::credential("ECS metadata returned no RAM role name"))?
            .to_string();
        tracing::debug!(role_name = %role, "Discovered ECS RAM role");
        Ok(self.discovered_role.get_or_init(|| role).clone())
    }

    fn accept_credentials(&self, response: HttpResponse, url: &str) -> Result<CredentialModel> {
        let document: MetadataCredentials = response.error_for_status(url)?.json()?;
        Ok(document
            .into_model(NAME)?
            .with_type(CredentialType::EcsRamRole))
    }
}

#[async_trait]
impl SessionCredentialsSource for InstanceMetadata {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self) -> Result<CredentialModel> {
        let token = self.accept_token(self.http.send(self.token_request()).await)?;
        let role = match self.known_role() {
            Some(role) => role.to_string(),
            None => {
                let request = self.get(self.url(CREDENTIALS_PATH), token.as_deref());
                self.accept_role(self.http.send(request).await?)?
            }
        };
        let url = self.url(&format!("{}{}", CREDENTIALS_PATH, role));
        let response = self.http.send(self.get(url.clone(), token.as_deref())).await?;
        self.accept_credentials(response, &url)
    }

    fn fetch_blocking(&self) -> Result<CredentialModel> {
        let token = self.accept_token(self.http.send_blocking(self.token_request()))?;
        let role = match self.known_role() {
            Some(role) => role.to_string(),
            None => {
                let request = self.get(self.url(CREDENTIALS_PATH), token.as_deref());
                self.accept_role(self.http.send_blocking(request)?)?
            }
        };
        let url = self.url(&format!("{}{}", CREDENTIALS_PATH, role));
        let response = self.http.send_blocking(self.get(url.clone(), token.as_deref()))?;
        self.accept_credentials(response, &url)
    }
}

/// Credentials of the RAM role attached to the current ECS instance.
#[derive(Debug)]
pub struct EcsRamRoleCredentialsProvider {
    session: SessionCredentialsProvider<InstanceMetadata>,
}

impl EcsRamRoleCredentialsProvider {
    pub fn new(config: EcsRamRoleConfig) -> Result<Self> {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()?))
    }

    pub fn with_http_client(config: EcsRamRoleConfig, http: Arc<dyn HttpClient>) -> Result<Self> {
        let base = endpoint_url(&config.endpoint, "http")?;
        let base_url = base.as_str().trim_end_matches('/').to_string();
        let session_options = config.session.clone();
        Ok(Self {
            session: SessionCredentialsProvider::new(
                InstanceMetadata {
                    config,
                    base_url,
                    http,
                    discovered_role: OnceLock::new(),
                },
                &session_options,
            ),
        })
    }

    /// Configured role, or the one discovered by the first refresh.
    pub fn role_name(&self) -> Option<&str> {
        self.session.source().known_role()
    }
}

#[async_trait]
impl CredentialsProvider for EcsRamRoleCredentialsProvider {
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
