//! Default credential chain.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    CliProfileCredentialsProvider, EcsRamRoleConfig, EcsRamRoleCredentialsProvider,
    EnvironmentVariableCredentialsProvider, OidcRoleArnConfig, OidcRoleArnCredentialsProvider,
    ProfileCredentialsProvider, SessionOptions, UriCredentialsConfig, UriCredentialsProvider,
};
use crate::config::Environment;
use crate::config::env::{ECS_METADATA, ECS_METADATA_DISABLED};
use crate::credential::CredentialModel;
use crate::http::HttpClient;
use crate::provider::CredentialsProvider;
use crate::{Error, Result};

const NAME: &str = "default";

/// Options for [`DefaultCredentialsProvider::new`].
#[derive(Clone, Debug)]
pub struct DefaultProviderOptions {
    /// Call the provider that last succeeded directly instead of walking
    /// the chain. Defaults to `true`.
    pub reuse_last_provider_enabled: bool,
    /// Cache behaviour for the refreshing providers in the chain.
    pub session: SessionOptions,
}

impl Default for DefaultProviderOptions {
    fn default() -> Self {
        Self {
            reuse_last_provider_enabled: true,
            session: SessionOptions::default(),
        }
    }
}

/// Tries credential sources in order until one succeeds.
///
/// The standard order is environment variables, OIDC (when its three
/// variables are set), the CLI profile, the credentials file, ECS metadata
/// (when `ALIBABA_CLOUD_ECS_METADATA` is set) and the credentials URI (when
/// `ALIBABA_CLOUD_CREDENTIALS_URI` is set). Providers added later go to the
/// front.
pub struct DefaultCredentialsProvider {
    providers: Vec<Arc<dyn CredentialsProvider>>,
    reuse_last_provider_enabled: bool,
    last_used: RwLock<Option<Arc<dyn CredentialsProvider>>>,
}

impl std::fmt::Debug for DefaultCredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("DefaultCredentialsProvider")
            .field("providers", &names)
            .field("reuse_last_provider_enabled", &self.reuse_last_provider_enabled)
            .field(
                "last_used",
                &self.last_used.read().as_ref().map(|p| p.name().to_string()),
            )
            .finish()
    }
}

impl DefaultCredentialsProvider {
    /// Standard chain for `env`.
    pub fn new(
        env: &Environment,
        http: Arc<dyn HttpClient>,
        options: DefaultProviderOptions,
    ) -> Result<Self> {
        let session = options.session;
        let mut providers: Vec<Arc<dyn CredentialsProvider>> = vec![Arc::new(
            EnvironmentVariableCredentialsProvider::new(env.clone()),
        )];

        if let Some(config) = OidcRoleArnConfig::from_env(env) {
            providers.push(Arc::new(OidcRoleArnCredentialsProvider::with_http_client(
                OidcRoleArnConfig {
                    session: session.clone(),
                    ..config
                },
                Arc::clone(&http),
            )?));
        }

        providers.push(Arc::new(CliProfileCredentialsProvider::new(
            env,
            Arc::clone(&http),
            session.clone(),
        )));
        providers.push(Arc::new(ProfileCredentialsProvider::new(
            env,
            Arc::clone(&http),
            session.clone(),
        )));

        if env.var(ECS_METADATA).is_some() && !env.flag(ECS_METADATA_DISABLED) {
            providers.push(Arc::new(EcsRamRoleCredentialsProvider::with_http_client(
                EcsRamRoleConfig {
                    session: session.clone(),
                    ..EcsRamRoleConfig::from_env(env)
                },
                Arc::clone(&http),
            )?));
        }

        if let Some(config) = UriCredentialsConfig::from_env(env) {
            providers.push(Arc::new(UriCredentialsProvider::with_http_client(
                UriCredentialsConfig { session, ..config },
                http,
            )?));
        }

        Ok(Self::from_providers(
            providers,
            options.reuse_last_provider_enabled,
        ))
    }

    /// Chain over exactly `providers`, in order.
    pub fn from_providers(
        providers: Vec<Arc<dyn CredentialsProvider>>,
        reuse_last_provider_enabled: bool,
    ) -> Self {
        Self {
            providers,
            reuse_last_provider_enabled,
            last_used: RwLock::new(None),
        }
    }

    /// Insert `provider` at the front of the chain.
    pub fn add_credentials_provider(&mut self, provider: Arc<dyn CredentialsProvider>) {
        self.providers.insert(0, provider);
    }

    /// Remove every occurrence of `provider`; returns whether one was found.
    pub fn remove_credentials_provider(&mut self, provider: &Arc<dyn CredentialsProvider>) -> bool {
        let before = self.providers.len();
        self.providers.retain(|p| !Arc::ptr_eq(p, provider));
        *self.last_used.get_mut() = None;
        self.providers.len() != before
    }

    pub fn contains_credentials_provider(&self, provider: &Arc<dyn CredentialsProvider>) -> bool {
        self.providers.iter().any(|p| Arc::ptr_eq(p, provider))
    }

    pub fn clear_credentials_provider(&mut self) {
        self.providers.clear();
        *self.last_used.get_mut() = None;
    }

    pub fn providers(&self) -> &[Arc<dyn CredentialsProvider>] {
        &self.providers
    }

    /// Provider that served the last successful chain walk.
    pub fn last_used_provider(&self) -> Option<Arc<dyn CredentialsProvider>> {
        self.last_used.read().clone()
    }

    fn reusable(&self) -> Option<Arc<dyn CredentialsProvider>> {
        if self.reuse_last_provider_enabled {
            self.last_used.read().clone()
        } else {
            None
        }
    }

    fn remember(&self, provider: &Arc<dyn CredentialsProvider>) {
        *self.last_used.write() = Some(Arc::clone(provider));
    }

    fn exhausted(errors: Vec<String>) -> Error {
        Error::credential(format!("not found credentials: [{}]", errors.join(", ")))
    }
}

#[async_trait]
impl CredentialsProvider for DefaultCredentialsProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_credentials(&self) -> Result<CredentialModel> {
        if let Some(provider) = self.reusable() {
            return Ok(provider.get_credentials().await?.with_provider_name(NAME));
        }

        let mut errors = Vec::new();
        for provider in &self.providers {
            match provider.get_credentials().await {
                Ok(cred) => {
                    tracing::debug!(provider = %provider.name(), "Credentials resolved");
                    self.remember(provider);
                    return Ok(cred.with_provider_name(NAME));
                }
                Err(e) => {
                    tracing::debug!(provider = %provider.name(), error = %e, "Provider failed");
                    errors.push(format!("{}: {}", provider.name(), e));
                }
            }
        }
        Err(Self::exhausted(errors))
    }

    fn get_credentials_blocking(&self) -> Result<CredentialModel> {
        if let Some(provider) = self.reusable() {
            return Ok(provider.get_credentials_blocking()?.with_provider_name(NAME));
        }

        let mut errors = Vec::new();
        for provider in &self.providers {
            match provider.get_credentials_blocking() {
                Ok(cred) => {
                    tracing::debug!(provider = %provider.name(), "Credentials resolved");
                    self.remember(provider);
                    return Ok(cred.with_provider_name(NAME));
                }
                Err(e) => {
                    tracing::debug!(provider = %provider.name(), error = %e, "Provider failed");
                    errors.push(format!("{}: {}", provider.name(), e));
                }
            }
        }
        Err(Self::exhausted(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::{
        ACCESS_KEY_ID, ACCESS_KEY_SECRET, CREDENTIALS_URI, OIDC_PROVIDER_ARN, OIDC_TOKEN_FILE,
        ROLE_ARN,
    };
    use crate::http::testing::ScriptedHttpClient;
    use crate::providers::StaticAkCredentialsProvider;

    fn names(chain: &DefaultCredentialsProvider) -> Vec<&str> {
        chain.providers().iter().map(|p| p.name()).collect()
    }

    fn chain(env: &Environment) -> DefaultCredentialsProvider {
        DefaultCredentialsProvider::new(
            env,
            Arc::new(ScriptedHttpClient::new()),
            DefaultProviderOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            names(&chain(&Environment::empty())),
            vec!["env", "cli_profile", "profile"]
        );

        let env = Environment::empty()
            .with_var(ROLE_ARN, "acs:ram::1:role/r")
            .with_var(OIDC_PROVIDER_ARN, "acs:ram::1:oidc-provider/p")
            .with_var(OIDC_TOKEN_FILE, "/token")
            .with_var(ECS_METADATA, "role")
            .with_var(CREDENTIALS_URI, "http://localhost/creds");
        assert_eq!(
            names(&chain(&env)),
            vec![
                "env",
                "oidc_role_arn",
                "cli_profile",
                "profile",
                "ecs_ram_role",
                "credentials_uri"
            ]
        );

        let env = env.with_var(ECS_METADATA_DISABLED, "true");
        assert!(!names(&chain(&env)).contains(&"ecs_ram_role"));
    }

    #[test]
    fn test_env_credentials_win() {
        let env = Environment::empty()
            .with_var(ACCESS_KEY_ID, "env-ak")
            .with_var(ACCESS_KEY_SECRET, "env-sk");
        let chain = chain(&env);
        let cred = chain.get_credentials_blocking().unwrap();
        assert_eq!(cred.access_key_id.as_deref(), Some("env-ak"));
        assert_eq!(cred.provider_name, "default/env");
        assert_eq!(chain.last_used_provider().unwrap().name(), "env");
    }

    #[tokio::test]
    async fn test_exhausted_message_lists_every_provider() {
        let home = tempfile::tempdir().unwrap();
        let env = Environment::empty().with_home_dir(home.path());
        let err = chain(&env).get_credentials().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("not found credentials: [env: "));
        assert!(msg.contains("cli_profile: unable to open credentials file"));
        assert!(msg.contains("profile: unable to open credentials file"));
    }

    #[test]
    fn test_mutators() {
        let mut chain = DefaultCredentialsProvider::from_providers(Vec::new(), true);
        let first: Arc<dyn CredentialsProvider> =
            Arc::new(StaticAkCredentialsProvider::new("a", "1").unwrap());
        let second: Arc<dyn CredentialsProvider> =
            Arc::new(StaticAkCredentialsProvider::new("b", "2").unwrap());

        chain.add_credentials_provider(Arc::clone(&first));
        chain.add_credentials_provider(Arc::clone(&second));
        assert!(chain.contains_credentials_provider(&first));
        assert_eq!(
            chain.get_credentials_blocking().unwrap().access_key_id.as_deref(),
            Some("b")
        );

        assert!(chain.remove_credentials_provider(&second));
        assert!(!chain.remove_credentials_provider(&second));
        assert!(chain.last_used_provider().is_none());
        assert_eq!(
            chain.get_credentials_blocking().unwrap().access_key_id.as_deref(),
            Some("a")
        );

        chain.clear_credentials_provider();
        assert!(chain.providers().is_empty());
        assert!(chain.last_used_provider().is_none());
        assert_eq!(
            chain.get_credentials_blocking().unwrap_err().to_string(),
            "not found credentials: []"
        );
    }
}
