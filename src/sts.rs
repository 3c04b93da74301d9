//! STS and metadata wire formats.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::credential::CredentialModel;
use crate::http::HttpResponse;
use crate::{Error, Result};

pub(crate) const STS_VERSION: &str = "2015-04-01";
pub(crate) const DEFAULT_STS_ENDPOINT: &str = "sts.aliyuncs.com";
pub(crate) const DEFAULT_DURATION_SECONDS: u32 = 3600;
pub(crate) const MIN_DURATION_SECONDS: u32 = 900;

/// Explicit endpoint, then regional (VPC) endpoint, then the global one.
pub(crate) fn resolve_endpoint(
    explicit: Option<&str>,
    region: Option<&str>,
    enable_vpc: bool,
) -> String {
    if let Some(endpoint) = explicit.map(str::trim).filter(|e| !e.is_empty()) {
        return endpoint.to_string();
    }
    match region.map(str::trim).filter(|r| !r.is_empty()) {
        Some(region) if enable_vpc => format!("sts-vpc.{}.aliyuncs.com", region),
        Some(region) => format!("sts.{}.aliyuncs.com", region),
        None => DEFAULT_STS_ENDPOINT.to_string(),
    }
}

/// `endpoint` is either a bare host, reached with `default_scheme`, or a
/// full base URL.
pub(crate) fn endpoint_url(endpoint: &str, default_scheme: &str) -> Result<url::Url> {
    let raw = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("{}://{}", default_scheme, endpoint)
    };
    url::Url::parse(&raw)
        .map_err(|e| Error::config(format!("invalid endpoint '{}': {}", endpoint, e)))
}

pub(crate) fn default_role_session_name() -> String {
    format!("credentials-rust-{}", Utc::now().timestamp_millis())
}

pub(crate) fn validate_duration(duration_seconds: u32) -> Result<()> {
    if duration_seconds < MIN_DURATION_SECONDS {
        return Err(Error::config(format!(
            "duration_seconds must be at least {}, got {}",
            MIN_DURATION_SECONDS, duration_seconds
        )));
    }
    Ok(())
}

/// RFC 3339 / ISO 8601 UTC timestamp to epoch millis.
pub(crate) fn parse_expiration(raw: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| Error::Parse(format!("invalid expiration '{}': {}", raw, e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct StsCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: String,
    pub expiration: String,
}

impl StsCredentials {
    pub(crate) fn into_model(self, provider_name: &str) -> Result<CredentialModel> {
        let expiration = parse_expiration(&self.expiration)?;
        Ok(CredentialModel::sts(
            self.access_key_id,
            self.access_key_secret,
            self.security_token,
            provider_name,
        )
        .with_expiration(expiration))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    credentials: Option<StsCredentials>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsErrorBody {
    code: Option<String>,
    message: Option<String>,
    request_id: Option<String>,
}

/// Parse an `AssumeRole` / `AssumeRoleWithOIDC` response.
pub(crate) fn parse_assume_role(
    response: HttpResponse,
    url: &str,
    provider_name: &str,
) -> Result<CredentialModel> {
    if !response.is_success() {
        if let Ok(body) = response.json::<StsErrorBody>()
            && let Some(code) = body.code
        {
            return Err(Error::credential(format!(
                "{} failed: {}: {} (RequestId: {})",
                provider_name,
                code,
                body.message.unwrap_or_default(),
                body.request_id.unwrap_or_default()
            )));
        }
        return Err(Error::Http {
            status: response.status,
            url: url.to_string(),
            body: response.text(),
        });
    }

    let parsed: AssumeRoleResponse = response.json()?;
    let credentials = parsed.credentials.ok_or_else(|| {
        Error::Parse(format!("{} response carries no Credentials", provider_name))
    })?;
    credentials.into_model(provider_name)
}

/// Credential document served by ECS metadata and credential URIs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MetadataCredentials {
    pub code: Option<String>,
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    pub security_token: Option<String>,
    pub expiration: Option<String>,
}

impl MetadataCredentials {
    pub(crate) fn into_model(self, provider_name: &str) -> Result<CredentialModel> {
        if let Some(code) = self.code.as_deref()
            && code != "Success"
        {
            return Err(Error::credential(format!(
                "{} returned code '{}'",
                provider_name, code
            )));
        }
        let (Some(id), Some(secret), Some(token), Some(expiration)) = (
            self.access_key_id,
            self.access_key_secret,
            self.security_token,
            self.expiration,
        ) else {
            return Err(Error::Parse(format!(
                "{} response is missing AccessKeyId, AccessKeySecret, SecurityToken or Expiration",
                provider_name
            )));
        };
        StsCredentials {
            access_key_id: id,
            access_key_secret: secret,
            security_token: token,
            expiration,
        }
        .into_model(provider_name)
    }
}
