//! RAM role assumption through STS `AssumeRole`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::session::{SessionCredentialsProvider, SessionCredentialsSource, SessionOptions};
use crate::credential::{CredentialModel, CredentialType};
use crate::http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, HttpClient, HttpRequest, HttpResponse, Method,
    ReqwestHttpClient,
};
use crate::provider::CredentialsProvider;
use crate::sign::AcsRequest;
use crate::sts::{
    DEFAULT_DURATION_SECONDS, STS_VERSION, default_role_session_name, parse_assume_role,
    resolve_endpoint, validate_duration,
};
use crate::{Error, Result};

const NAME: &str = "ram_role_arn";

/// Parameters for [`RamRoleArnCredentialsProvider`].
#[derive(Clone, Debug)]
pub struct RamRoleArnConfig {
    /// Required.
    pub role_arn: String,
    /// Defaults to `credentials-rust-<epoch millis>`.
    pub role_session_name: String,
    pub policy: Option<String>,
    pub external_id: Option<String>,
    /// Defaults to 3600, at least 900.
    pub duration_seconds: u32,
    pub sts_region_id: Option<String>,
    /// Overrides the endpoint derived from `sts_region_id`.
    pub sts_endpoint: Option<String>,
    pub enable_vpc: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub session: SessionOptions,
}

impl Default for RamRoleArnConfig {
    fn default() -> Self {
        Self {
            role_arn: String::new(),
            role_session_name: default_role_session_name(),
            policy: None,
            external_id: None,
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

struct AssumeRole {
    source: Arc<dyn CredentialsProvider>,
    config: RamRoleArnConfig,
    endpoint: String,
    http: Arc<dyn HttpClient>,
}

impl AssumeRole {
    fn request(&self, credential: &CredentialModel) -> Result<HttpRequest> {
        let config = &self.config;
        let request = AcsRequest::new(Method::Post, &self.endpoint, "AssumeRole", STS_VERSION)
            .query("RoleArn", &config.role_arn)
            .query("RoleSessionName", &config.role_session_name)
            .query("DurationSeconds", config.duration_seconds.to_string())
            .query_opt("Policy", config.policy.as_deref())
            .query_opt("ExternalId", config.external_id.as_deref())
            .sign(credential)?;
        Ok(request.timeouts(config.connect_timeout, config.read_timeout))
    }

    fn finish(&self, response: HttpResponse, url: &str, inner: &str) -> Result<CredentialModel> {
        let mut credential =
            parse_assume_role(response, url, NAME)?.with_type(CredentialType::RamRoleArn);
        credential.provider_name = format!("{}/{}", NAME, inner);
        Ok(credential)
    }
}

#[async_trait]
impl SessionCredentialsSource for AssumeRole {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self) -> Result<CredentialModel> {
        let source = self.source.get_credentials().await?;
        let request = self.request(&source)?;
        let url = request.url.clone();
        tracing::debug!(
            role_arn = %self.config.role_arn,
            endpoint = %self.endpoint,
            "Assuming RAM role"
        );
        let response = self.http.send(request).await?;
        self.finish(response, &url, &source.provider_name)
    }

    fn fetch_blocking(&self) -> Result<CredentialModel> {
        let source = self.source.get_credentials_blocking()?;
        let request = self.request(&source)?;
        let url = request.url.clone();
        tracing::debug!(
            role_arn = %self.config.role_arn,
            endpoint = %self.endpoint,
            "Assuming RAM role"
        );
        let response = self.http.send_blocking(request)?;
        self.finish(response, &url, &source.provider_name)
    }
}

/// Assumes a RAM role with credentials from another provider and caches the
/// resulting STS token.
#[derive(Debug)]
pub struct RamRoleArnCredentialsProvider {
    session: SessionCredentialsProvider<AssumeRole>,
}

impl RamRoleArnCredentialsProvider {
    pub fn new(source: Arc<dyn CredentialsProvider>, config: RamRoleArnConfig) -> Result<Self> {
        Self::with_http_client(source, config, Arc::new(ReqwestHttpClient::new()?))
    }

    pub fn with_http_client(
        source: Arc<dyn CredentialsProvider>,
        config: RamRoleArnConfig,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        if config.role_arn.trim().is_empty() {
            return Err(Error::config("role_arn is required"));
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
                AssumeRole {
                    source,
                    config,
                    endpoint,
                    http,
                },
                &session_options,
            ),
        })
    }

    pub fn role_arn(&self) -> &str {
        &self.session.source().config.role_arn
    }

    pub fn endpoint(&self) -> &str {
        &self.session.source().endpoint
    }
}

impl std::fmt::Debug for AssumeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssumeRole")
            .field("source", &self.source.name())
            .field("role_arn", &self.config.role_arn)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl CredentialsProvider for RamRoleArnCredentialsProvider {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedHttpClient;
    use crate::providers::StaticAkCredentialsProvider;

    const ASSUMED: &str = r#"{
        "RequestId": "req",
        "Credentials": {
            "AccessKeyId": "STS.assumed",
            "AccessKeySecret": "assumed-secret",
            "SecurityToken": "assumed-token",
            "Expiration": "2099-01-01T00:00:00Z"
        }
    }"#;

    fn source() -> Arc<dyn CredentialsProvider> {
        Arc::new(StaticAkCredentialsProvider::new("ak", "sk").unwrap())
    }

    fn config() -> RamRoleArnConfig {
        RamRoleArnConfig {
            role_arn: "acs:ram::123456:role/test".into(),
            role_session_name: "unit".into(),
            sts_region_id: Some("cn-hangzhou".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = RamRoleArnConfig::default();
        assert_eq!(config.duration_seconds, 3600);
        assert!(config.role_session_name.starts_with("credentials-rust-"));
        assert_eq!(config.connect_timeout, Duration::from_millis(1000));
        assert_eq!(config.read_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_config_validation() {
        let http = Arc::new(ScriptedHttpClient::new());
        let err = RamRoleArnCredentialsProvider::with_http_client(
            source(),
            RamRoleArnConfig::default(),
            http.clone(),
        )
        .unwrap_err();
        assert!(err.is_configuration_error());

        let err = RamRoleArnCredentialsProvider::with_http_client(
            source(),
            RamRoleArnConfig {
                duration_seconds: 600,
                ..config()
            },
            http,
        )
        .unwrap_err();
        assert!(err.to_string().contains("900"));
    }

    #[test]
    fn test_assume_role_blocking() {
        let http = Arc::new(ScriptedHttpClient::new().respond(200, ASSUMED));
        let provider =
            RamRoleArnCredentialsProvider::with_http_client(source(), config(), http.clone())
                .unwrap();
        assert_eq!(provider.endpoint(), "sts.cn-hangzhou.aliyuncs.com");

        let cred = provider.get_credentials_blocking().unwrap();
        assert_eq!(cred.access_key_id.as_deref(), Some("STS.assumed"));
        assert_eq!(cred.security_token(), Some("assumed-token"));
        assert_eq!(cred.provider_name, "ram_role_arn/static_ak");

        // cached
        provider.get_credentials_blocking().unwrap();
        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, Method::Post);
        assert!(request.url.starts_with("https://sts.cn-hangzhou.aliyuncs.com/?"));
        assert!(request.url.contains("DurationSeconds=3600"));
        assert!(request.url.contains("RoleSessionName=unit"));
        assert_eq!(request.header_value("x-acs-action"), Some("AssumeRole"));
        assert!(request
            .header_value("authorization")
            .unwrap()
            .starts_with("ACS3-HMAC-SHA256 Credential=ak,"));
    }

    #[tokio::test]
    async fn test_assume_role_error_surfaces() {
        let http = Arc::new(
            ScriptedHttpClient::new()
                .respond(403, r#"{"Code":"NoPermission","Message":"denied","RequestId":"r"}"#),
        );
        let provider =
            RamRoleArnCredentialsProvider::with_http_client(source(), config(), http).unwrap();

        let err = provider.get_credentials().await.unwrap_err();
        assert!(matches!(err, Error::Credential { .. }));
        assert!(err.to_string().contains("NoPermission"));
    }

    #[tokio::test]
    async fn test_network_error_wrapped() {
        let http = Arc::new(ScriptedHttpClient::new().fail(Error::Timeout(Duration::from_secs(2))));
        let provider =
            RamRoleArnCredentialsProvider::with_http_client(source(), config(), http).unwrap();

        let err = provider.get_credentials().await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to refresh credentials"));
    }
}
