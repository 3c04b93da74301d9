//! Prelude module for convenient imports.
//!
//! ```rust
//! use alibabacloud_credentials::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::Result;

// Client
pub use crate::Client;
pub use crate::Config;
pub use crate::Environment;

// Credentials
pub use crate::CredentialModel;
pub use crate::CredentialType;
pub use crate::CredentialsProvider;

// Providers
pub use crate::providers::{
    DefaultCredentialsProvider, EcsRamRoleConfig, EcsRamRoleCredentialsProvider,
    OidcRoleArnConfig, OidcRoleArnCredentialsProvider, RamRoleArnConfig,
    RamRoleArnCredentialsProvider, SessionOptions, StaticAkCredentialsProvider,
    StaticStsCredentialsProvider,
};

// Cache
pub use crate::cache::StaleValueBehavior;
