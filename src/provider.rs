//! Credential provider trait.

use async_trait::async_trait;

use crate::Result;
use crate::credential::CredentialModel;

/// Trait for resolving credentials from a source.
///
/// Every provider serves both channels: the async one for callers on a
/// runtime and the blocking one for plain threads.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Provider name used in provenance and error messages.
    fn name(&self) -> &str;

    async fn get_credentials(&self) -> Result<CredentialModel>;

    fn get_credentials_blocking(&self) -> Result<CredentialModel>;
}
