//! Credentials served by an HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::session::{SessionCredentialsProvider, SessionCredentialsSource, SessionOptions};
use crate::config::Environment;
use crate::config::env::CREDENTIALS_URI;
use crate::credential::{CredentialModel, CredentialType};
use crate::http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, HttpClient, HttpRequest, HttpResponse, Method,
    ReqwestHttpClient,
};
use crate::provider::CredentialsProvider;
use crate::sts::MetadataCredentials;
use crate::{Error, Result};

const NAME: &str = "credentials_uri";

/// Parameters for [`UriCredentialsProvider`].
#[derive(Clone, Debug)]
pub struct UriCredentialsConfig {
    /// Required.
    pub credentials_uri: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub session: SessionOptions,
}

impl Default for UriCredentialsConfig {
    fn default() -> Self {
        Self {
            credentials_uri: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            session: SessionOptions::default(),
        }
    }
}

impl UriCredentialsConfig {
    /// `None` unless `ALIBABA_CLOUD_CREDENTIALS_URI` is set.
    pub fn from_env(env: &Environment) -> Option<Self> {
        env.var(CREDENTIALS_URI).map(|uri| Self {
            credentials_uri: uri.to_string(),
            ..Default::default()
        })
    }
}

#[derive(Debug)]
struct CredentialsEndpoint {
    config: UriCredentialsConfig,
    http: Arc<dyn HttpClient>,
}

impl CredentialsEndpoint {
    fn request(&self) -> HttpRequest {
        HttpRequest::new(Method::Get, &self.config.credentials_uri)
            .timeouts(self.config.connect_timeout, self.config.read_timeout)
    }

    fn accept(&self, response: HttpResponse) -> Result<CredentialModel> {
        let document: MetadataCredentials = response
            .error_for_status(&self.config.credentials_uri)?
            .json()?;
        Ok(document
            .into_model(NAME)?
            .with_type(CredentialType::CredentialsUri))
    }
}

#[async_trait]
impl SessionCredentialsSource for CredentialsEndpoint {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self) -> Result<CredentialModel> {
        let response = self.http.send(self.request()).await?;
        self.accept(response)
    }

    fn fetch_blocking(&self) -> Result<CredentialModel> {
        let response = self.http.send_blocking(self.request())?;
        self.accept(response)
    }
}

/// GETs an STS-shaped credential document from a URI.
#[derive(Debug)]
pub struct UriCredentialsProvider {
    session: SessionCredentialsProvider<CredentialsEndpoint>,
}

impl UriCredentialsProvider {
    pub fn new(config: UriCredentialsConfig) -> Result<Self> {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()?))
    }

    pub fn with_http_client(
        config: UriCredentialsConfig,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        if config.credentials_uri.trim().is_empty() {
            return Err(Error::config("credentials_uri is required"));
        }
        url::Url::parse(&config.credentials_uri).map_err(|e| {
            Error::config(format!(
                "invalid credentials_uri '{}': {}",
                config.credentials_uri, e
            ))
        })?;

        let session_options = config.session.clone();
        Ok(Self {
            session: SessionCredentialsProvider::new(
                CredentialsEndpoint { config, http },
                &session_options,
            ),
        })
    }
}

#[async_trait]
impl CredentialsProvider for UriCredentialsProvider {
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

    fn config() -> UriCredentialsConfig {
        UriCredentialsConfig {
            credentials_uri: "http://localhost:8080/credentials".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_uri_rejected() {
        let http: Arc<dyn HttpClient> = Arc::new(ScriptedHttpClient::new());
        assert!(
            UriCredentialsProvider::with_http_client(Default::default(), http.clone()).is_err()
        );

        let err = UriCredentialsProvider::with_http_client(
            UriCredentialsConfig {
                credentials_uri: "not a uri".into(),
                ..Default::default()
            },
            http,
        )
        .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_fetch() {
        let http = Arc::new(ScriptedHttpClient::new().respond(
            200,
            r#"{"Code":"Success","AccessKeyId":"STS.uri","AccessKeySecret":"s","SecurityToken":"t","Expiration":"2099-01-01T00:00:00Z"}"#,
        ));
        let provider = UriCredentialsProvider::with_http_client(config(), http.clone()).unwrap();

        let cred = provider.get_credentials().await.unwrap();
        assert_eq!(cred.access_key_id.as_deref(), Some("STS.uri"));
        assert_eq!(cred.credential_type, CredentialType::CredentialsUri);
        assert_eq!(http.requests()[0].url, "http://localhost:8080/credentials");
    }

    #[test]
    fn test_http_error() {
        let http = Arc::new(ScriptedHttpClient::new().respond(500, "oops"));
        let provider = UriCredentialsProvider::with_http_client(config(), http).unwrap();

        let err = provider.get_credentials_blocking().unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_from_env() {
        assert!(UriCredentialsConfig::from_env(&Environment::empty()).is_none());
        let env = Environment::empty().with_var(CREDENTIALS_URI, "http://127.0.0.1/creds");
        assert_eq!(
            UriCredentialsConfig::from_env(&env).unwrap().credentials_uri,
            "http://127.0.0.1/creds"
        );
    }
}
