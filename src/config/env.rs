//! Environment snapshot.
//!
//! Variables are captured once into an [`Environment`] value that is passed
//! to the providers that need it. Nothing reads the process environment
//! behind the caller's back, and tests build snapshots instead of mutating
//! process state.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use directories::BaseDirs;

pub const ACCESS_KEY_ID: &str = "ALIBABA_CLOUD_ACCESS_KEY_ID";
pub const ACCESS_KEY_SECRET: &str = "ALIBABA_CLOUD_ACCESS_KEY_SECRET";
pub const SECURITY_TOKEN: &str = "ALIBABA_CLOUD_SECURITY_TOKEN";
pub const ROLE_ARN: &str = "ALIBABA_CLOUD_ROLE_ARN";
pub const OIDC_PROVIDER_ARN: &str = "ALIBABA_CLOUD_OIDC_PROVIDER_ARN";
pub const OIDC_TOKEN_FILE: &str = "ALIBABA_CLOUD_OIDC_TOKEN_FILE";
pub const ROLE_SESSION_NAME: &str = "ALIBABA_CLOUD_ROLE_SESSION_NAME";
pub const STS_REGION: &str = "ALIBABA_CLOUD_STS_REGION";
pub const VPC_ENDPOINT_ENABLED: &str = "ALIBABA_CLOUD_VPC_ENDPOINT_ENABLED";
pub const PROFILE: &str = "ALIBABA_CLOUD_PROFILE";
pub const CLI_PROFILE_DISABLED: &str = "ALIBABA_CLOUD_CLI_PROFILE_DISABLED";
pub const CREDENTIALS_FILE: &str = "ALIBABA_CLOUD_CREDENTIALS_FILE";
pub const ECS_METADATA: &str = "ALIBABA_CLOUD_ECS_METADATA";
pub const ECS_METADATA_DISABLED: &str = "ALIBABA_CLOUD_ECS_METADATA_DISABLED";
pub const IMDSV1_DISABLED: &str = "ALIBABA_CLOUD_IMDSV1_DISABLED";
pub const CREDENTIALS_URI: &str = "ALIBABA_CLOUD_CREDENTIALS_URI";

/// Immutable view of environment variables and the user's home directory.
#[derive(Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
    home_dir: Option<PathBuf>,
}

impl Environment {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
            home_dir: BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()),
        }
    }

    /// Empty snapshot with no home directory.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_home_dir(mut self, home_dir: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home_dir.into());
        self
    }

    /// Trimmed, non-empty value of `key`.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// `true` when `key` is set to "true" in any case.
    pub fn flag(&self, key: &str) -> bool {
        self.var(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn home_dir(&self) -> Option<&Path> {
        self.home_dir.as_deref()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self
            .vars
            .keys()
            .filter(|k| k.starts_with("ALIBABA_CLOUD_"))
            .collect();
        keys.sort();
        f.debug_struct("Environment")
            .field("vars", &keys)
            .field("home_dir", &self.home_dir)
            .finish()
    }
}
