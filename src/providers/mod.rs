//! Credential sources.
//!
//! Static and environment providers answer immediately. Providers that
//! exchange one credential for another (RAM role, OIDC, ECS metadata,
//! credentials URI) go through [`SessionCredentialsProvider`] and its
//! refresh cache. [`DefaultCredentialsProvider`] tries them in order.

mod chain;
mod cli_profile;
mod ecs_ram_role;
mod environment;
mod oidc;
mod profile;
mod ram_role_arn;
mod session;
mod static_credentials;
mod uri;

pub use chain::{DefaultCredentialsProvider, DefaultProviderOptions};
pub use cli_profile::CliProfileCredentialsProvider;
pub use ecs_ram_role::{EcsRamRoleConfig, EcsRamRoleCredentialsProvider};
pub use environment::EnvironmentVariableCredentialsProvider;
pub use oidc::{OidcRoleArnConfig, OidcRoleArnCredentialsProvider};
pub use profile::ProfileCredentialsProvider;
pub use ram_role_arn::{RamRoleArnConfig, RamRoleArnCredentialsProvider};
pub use session::{
    SessionCredentialsProvider, SessionCredentialsSource, SessionOptions, prefetch_time,
    stale_time,
};
pub use static_credentials::{
    BearerTokenCredentialsProvider, StaticAkCredentialsProvider, StaticStsCredentialsProvider,
};
pub use uri::{UriCredentialsConfig, UriCredentialsProvider};
