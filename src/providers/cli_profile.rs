//! Profiles from the Alibaba Cloud CLI configuration (`~/.aliyun/config.json`).

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    EcsRamRoleConfig, EcsRamRoleCredentialsProvider, OidcRoleArnConfig,
    OidcRoleArnCredentialsProvider, RamRoleArnConfig, RamRoleArnCredentialsProvider,
    SessionOptions, StaticAkCredentialsProvider, StaticStsCredentialsProvider,
};
use crate::config::Environment;
use crate::config::env::{CLI_PROFILE_DISABLED, PROFILE};
use crate::credential::CredentialModel;
use crate::http::HttpClient;
use crate::provider::CredentialsProvider;
use crate::{Error, Result};

const NAME: &str = "cli_profile";
const MAX_SOURCE_PROFILE_DEPTH: usize = 8;

#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    #[serde(default)]
    current: Option<String>,
    #[serde(default)]
    profiles: Vec<CliProfile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliProfile {
    name: String,
    mode: String,
    access_key_id: String,
    access_key_secret: String,
    sts_token: String,
    ram_role_name: String,
    ram_role_arn: String,
    ram_session_name: String,
    source_profile: String,
    oidc_provider_arn: String,
    oidc_token_file: String,
    external_id: String,
    expired_seconds: u32,
    sts_region: String,
    enable_vpc: bool,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Builds the provider described by the selected CLI profile on first use
/// and reuses it afterwards.
pub struct CliProfileCredentialsProvider {
    profile_name: Option<String>,
    config_path: Option<PathBuf>,
    disabled: bool,
    http: Arc<dyn HttpClient>,
    session: SessionOptions,
    resolved: OnceLock<Arc<dyn CredentialsProvider>>,
}

impl std::fmt::Debug for CliProfileCredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliProfileCredentialsProvider")
            .field("profile_name", &self.profile_name)
            .field("config_path", &self.config_path)
            .field("disabled", &self.disabled)
            .field("resolved", &self.resolved.get().map(|p| p.name().to_string()))
            .finish()
    }
}

impl CliProfileCredentialsProvider {
    pub fn new(env: &Environment, http: Arc<dyn HttpClient>, session: SessionOptions) -> Self {
        Self {
            profile_name: env.var(PROFILE).map(str::to_string),
            config_path: env
                .home_dir()
                .map(|home| home.join(".aliyun").join("config.json")),
            disabled: env.flag(CLI_PROFILE_DISABLED),
            http,
            session,
            resolved: OnceLock::new(),
        }
    }

    /// Use `name` instead of `ALIBABA_CLOUD_PROFILE` or the file's `current`.
    pub fn with_profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    fn config_path(&self) -> Result<&Path> {
        if self.disabled {
            return Err(Error::credential("CLI credentials file is disabled"));
        }
        self.config_path
            .as_deref()
            .ok_or_else(|| Error::credential("unable to locate the home directory"))
    }

    fn resolve(
        &self,
        path: &Path,
        contents: std::io::Result<String>,
    ) -> Result<Arc<dyn CredentialsProvider>> {
        let contents = contents.map_err(|e| {
            Error::credential(format!(
                "unable to open credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: CliConfig = serde_json::from_str(&contents)
            .map_err(|e| Error::Parse(format!("invalid CLI config {}: {}", path.display(), e)))?;

        let name = self
            .profile_name
            .clone()
            .or_else(|| config.current.clone())
            .unwrap_or_else(|| "default".to_string());
        let provider = self.build(&config, &name, 0)?;
        tracing::debug!(profile = %name, provider = %provider.name(), "Resolved CLI profile");
        Ok(Arc::clone(self.resolved.get_or_init(|| provider)))
    }

    fn build(
        &self,
        config: &CliConfig,
        name: &str,
        depth: usize,
    ) -> Result<Arc<dyn CredentialsProvider>> {
        let profile = config
            .profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::credential(format!("unable to get profile with '{}'", name)))?;

        let provider: Arc<dyn CredentialsProvider> = match profile.mode.as_str() {
            "AK" => Arc::new(StaticAkCredentialsProvider::new(
                &profile.access_key_id,
                &profile.access_key_secret,
            )?),
            "StsToken" => Arc::new(StaticStsCredentialsProvider::new(
                &profile.access_key_id,
                &profile.access_key_secret,
                &profile.sts_token,
            )?),
            "RamRoleArn" => {
                let source = Arc::new(StaticAkCredentialsProvider::new(
                    &profile.access_key_id,
                    &profile.access_key_secret,
                )?);
                Arc::new(RamRoleArnCredentialsProvider::with_http_client(
                    source,
                    self.ram_role_config(profile),
                    Arc::clone(&self.http),
                )?)
            }
            "ChainableRamRoleArn" => {
                if depth >= MAX_SOURCE_PROFILE_DEPTH {
                    return Err(Error::credential(format!(
                        "source_profile chain starting at '{}' is too deep",
                        name
                    )));
                }
                let source = self.build(config, &profile.source_profile, depth + 1)?;
                Arc::new(RamRoleArnCredentialsProvider::with_http_client(
                    source,
                    self.ram_role_config(profile),
                    Arc::clone(&self.http),
                )?)
            }
            "EcsRamRole" => Arc::new(EcsRamRoleCredentialsProvider::with_http_client(
                EcsRamRoleConfig {
                    role_name: non_empty(&profile.ram_role_name),
                    session: self.session.clone(),
                    ..Default::default()
                },
                Arc::clone(&self.http),
            )?),
            "OIDC" => {
                let mut oidc = OidcRoleArnConfig {
                    role_arn: profile.ram_role_arn.clone(),
                    oidc_provider_arn: profile.oidc_provider_arn.clone(),
                    oidc_token_file_path: PathBuf::from(&profile.oidc_token_file),
                    sts_region_id: non_empty(&profile.sts_region),
                    enable_vpc: profile.enable_vpc,
                    session: self.session.clone(),
                    ..Default::default()
                };
                if let Some(session_name) = non_empty(&profile.ram_session_name) {
                    oidc.role_session_name = session_name;
                }
                if profile.expired_seconds > 0 {
                    oidc.duration_seconds = profile.expired_seconds;
                }
                Arc::new(OidcRoleArnCredentialsProvider::with_http_client(
                    oidc,
                    Arc::clone(&self.http),
                )?)
            }
            other => {
                return Err(Error::credential(format!(
                    "unsupported profile mode '{}' from CLI credentials file",
                    other
                )));
            }
        };
        Ok(provider)
    }

    fn ram_role_config(&self, profile: &CliProfile) -> RamRoleArnConfig {
        let mut config = RamRoleArnConfig {
            role_arn: profile.ram_role_arn.clone(),
            external_id: non_empty(&profile.external_id),
            sts_region_id: non_empty(&profile.sts_region),
            enable_vpc: profile.enable_vpc,
            session: self.session.clone(),
            ..Default::default()
        };
        if let Some(session_name) = non_empty(&profile.ram_session_name) {
            config.role_session_name = session_name;
        }
        if profile.expired_seconds > 0 {
            config.duration_seconds = profile.expired_seconds;
        }
        config
    }

    async fn provider(&self) -> Result<Arc<dyn CredentialsProvider>> {
        if let Some(provider) = self.resolved.get() {
            return Ok(Arc::clone(provider));
        }
        let path = self.config_path()?;
        let contents = tokio::fs::read_to_string(path).await;
        self.resolve(path, contents)
    }

    fn provider_blocking(&self) -> Result<Arc<dyn CredentialsProvider>> {
        if let Some(provider) = self.resolved.get() {
            return Ok(Arc::clone(provider));
        }
        let path = self.config_path()?;
        self.resolve(path, std::fs::read_to_string(path))
    }
}

#[async_trait]
impl CredentialsProvider for CliProfileCredentialsProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_credentials(&self) -> Result<CredentialModel> {
        let provider = self.provider().await?;
        Ok(provider.get_credentials().await?.with_provider_name(NAME))
    }

    fn get_credentials_blocking(&self) -> Result<CredentialModel> {
        let provider = self.provider_blocking()?;
        Ok(provider.get_credentials_blocking()?.with_provider_name(NAME))
    }
}
