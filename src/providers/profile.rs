//! Profiles from the INI credentials file (`~/.alibabacloud/credentials`).
//!
//! ```ini
//! [default]
//! type = access_key
//! access_key_id = foo
//! access_key_secret = bar
//!
//! [deploy]
//! type = ram_role_arn
//! access_key_id = foo
//! access_key_secret = bar
//! role_arn = acs:ram::123456:role/deploy
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::{
    BearerTokenCredentialsProvider, EcsRamRoleConfig, EcsRamRoleCredentialsProvider,
    OidcRoleArnConfig, OidcRoleArnCredentialsProvider, RamRoleArnConfig,
    RamRoleArnCredentialsProvider, SessionOptions, StaticAkCredentialsProvider,
    StaticStsCredentialsProvider, UriCredentialsConfig, UriCredentialsProvider,
};
use crate::config::Environment;
use crate::config::env::{CREDENTIALS_FILE, PROFILE};
use crate::credential::{CredentialModel, CredentialType};
use crate::http::HttpClient;
use crate::provider::CredentialsProvider;
use crate::{Error, Result};

const NAME: &str = "profile";

type Section = HashMap<String, String>;

/// Sections of an INI document. `;` and `#` start comment lines; keys
/// outside any section are ignored.
fn parse_ini(contents: &str) -> Result<HashMap<String, Section>> {
    let mut sections: HashMap<String, Section> = HashMap::new();
    let mut current: Option<String> = None;

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .ok_or_else(|| Error::Parse(format!("line {}: unterminated section", index + 1)))?
                .trim()
                .to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::Parse(format!("line {}: expected key = value", index + 1)))?;
        if let Some(section) = current.as_ref().and_then(|name| sections.get_mut(name)) {
            section.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(sections)
}

/// Builds the provider described by one section of the credentials file on
/// first use and reuses it afterwards.
pub struct ProfileCredentialsProvider {
    profile_name: String,
    file_path: Option<PathBuf>,
    http: Arc<dyn HttpClient>,
    session: SessionOptions,
    resolved: OnceLock<Arc<dyn CredentialsProvider>>,
}

impl std::fmt::Debug for ProfileCredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCredentialsProvider")
            .field("profile_name", &self.profile_name)
            .field("file_path", &self.file_path)
            .field("resolved", &self.resolved.get().map(|p| p.name().to_string()))
            .finish()
    }
}

impl ProfileCredentialsProvider {
    /// Section from `ALIBABA_CLOUD_PROFILE` (else `default`), file from
    /// `ALIBABA_CLOUD_CREDENTIALS_FILE` (else `~/.alibabacloud/credentials`).
    pub fn new(env: &Environment, http: Arc<dyn HttpClient>, session: SessionOptions) -> Self {
        let file_path = env.var(CREDENTIALS_FILE).map(PathBuf::from).or_else(|| {
            env.home_dir()
                .map(|home| home.join(".alibabacloud").join("credentials"))
        });
        Self {
            profile_name: env.var(PROFILE).unwrap_or("default").to_string(),
            file_path,
            http,
            session,
            resolved: OnceLock::new(),
        }
    }

    pub fn with_profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = name.into();
        self
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    fn file_path(&self) -> Result<&Path> {
        self.file_path
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
        let sections = parse_ini(&contents)?;
        let section = sections.get(&self.profile_name).ok_or_else(|| {
            Error::credential(format!(
                "profile '{}' not found in {}",
                self.profile_name,
                path.display()
            ))
        })?;

        let provider = self.build(section)?;
        tracing::debug!(
            profile = %self.profile_name,
            provider = %provider.name(),
            "Resolved credentials profile"
        );
        Ok(Arc::clone(self.resolved.get_or_init(|| provider)))
    }

    fn get<'a>(&self, section: &'a Section, key: &str) -> Result<&'a str> {
        section
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::credential(format!(
                    "profile '{}' is missing '{}'",
                    self.profile_name, key
                ))
            })
    }

    fn build(&self, section: &Section) -> Result<Arc<dyn CredentialsProvider>> {
        let credential_type: CredentialType = self.get(section, "type")?.parse()?;
        let optional = |key: &str| section.get(key).filter(|v| !v.is_empty()).cloned();

        let provider: Arc<dyn CredentialsProvider> = match credential_type {
            CredentialType::AccessKey => Arc::new(StaticAkCredentialsProvider::new(
                self.get(section, "access_key_id")?,
                self.get(section, "access_key_secret")?,
            )?),
            CredentialType::Sts => Arc::new(StaticStsCredentialsProvider::new(
                self.get(section, "access_key_id")?,
                self.get(section, "access_key_secret")?,
                self.get(section, "security_token")?,
            )?),
            CredentialType::Bearer => Arc::new(BearerTokenCredentialsProvider::new(
                self.get(section, "bearer_token")?,
            )?),
            CredentialType::EcsRamRole => Arc::new(EcsRamRoleCredentialsProvider::with_http_client(
                EcsRamRoleConfig {
                    role_name: optional("role_name"),
                    session: self.session.clone(),
                    ..Default::default()
                },
                Arc::clone(&self.http),
            )?),
            CredentialType::RamRoleArn => {
                let source = Arc::new(StaticAkCredentialsProvider::new(
                    self.get(section, "access_key_id")?,
                    self.get(section, "access_key_secret")?,
                )?);
                let mut config = RamRoleArnConfig {
                    role_arn: self.get(section, "role_arn")?.to_string(),
                    policy: optional("policy"),
                    sts_region_id: optional("sts_region_id"),
                    session: self.session.clone(),
                    ..Default::default()
                };
                if let Some(name) = optional("role_session_name") {
                    config.role_session_name = name;
                }
                Arc::new(RamRoleArnCredentialsProvider::with_http_client(
                    source,
                    config,
                    Arc::clone(&self.http),
                )?)
            }
            CredentialType::OidcRoleArn => {
                let mut config = OidcRoleArnConfig {
                    role_arn: self.get(section, "role_arn")?.to_string(),
                    oidc_provider_arn: self.get(section, "oidc_provider_arn")?.to_string(),
                    oidc_token_file_path: PathBuf::from(self.get(section, "oidc_token_file_path")?),
                    policy: optional("policy"),
                    sts_region_id: optional("sts_region_id"),
                    session: self.session.clone(),
                    ..Default::default()
                };
                if let Some(name) = optional("role_session_name") {
                    config.role_session_name = name;
                }
                Arc::new(OidcRoleArnCredentialsProvider::with_http_client(
                    config,
                    Arc::clone(&self.http),
                )?)
            }
            CredentialType::CredentialsUri => Arc::new(UriCredentialsProvider::with_http_client(
                UriCredentialsConfig {
                    credentials_uri: self.get(section, "credentials_uri")?.to_string(),
                    session: self.session.clone(),
                    ..Default::default()
                },
                Arc::clone(&self.http),
            )?),
            CredentialType::RsaKeyPair => {
                return Err(Error::config("rsa_key_pair credentials are not supported"));
            }
        };
        Ok(provider)
    }

    async fn provider(&self) -> Result<Arc<dyn CredentialsProvider>> {
        if let Some(provider) = self.resolved.get() {
            return Ok(Arc::clone(provider));
        }
        let path = self.file_path()?;
        let contents = tokio::fs::read_to_string(path).await;
        self.resolve(path, contents)
    }

    fn provider_blocking(&self) -> Result<Arc<dyn CredentialsProvider>> {
        if let Some(provider) = self.resolved.get() {
            return Ok(Arc::clone(provider));
        }
        let path = self.file_path()?;
        self.resolve(path, std::fs::read_to_string(path))
    }
}

#[async_trait]
impl CredentialsProvider for ProfileCredentialsProvider {
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
