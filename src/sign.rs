//! ACS3-HMAC-SHA256 request signing for RPC-style Alibaba Cloud APIs.

use std::collections::BTreeMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::credential::CredentialModel;
use crate::http::{HttpRequest, Method};
use crate::sts::endpoint_url;
use crate::{Error, Result};

pub(crate) const ALGORITHM: &str = "ACS3-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// Unsigned RPC call: action, version and query parameters against one
/// endpoint.
#[derive(Debug, Clone)]
pub(crate) struct AcsRequest {
    method: Method,
    endpoint: String,
    action: &'static str,
    version: &'static str,
    query: BTreeMap<String, String>,
    date: String,
    nonce: String,
}

impl AcsRequest {
    /// `endpoint` is a host (`sts.aliyuncs.com`, https assumed) or a full
    /// base URL.
    pub(crate) fn new(
        method: Method,
        endpoint: impl Into<String>,
        action: &'static str,
        version: &'static str,
    ) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            action,
            version,
            query: BTreeMap::new(),
            date: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub(crate) fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.insert(key.to_string(), value.into());
        self
    }

    pub(crate) fn query_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    #[cfg(test)]
    fn with_clock_and_nonce(mut self, date: &str, nonce: &str) -> Self {
        self.date = date.to_string();
        self.nonce = nonce.to_string();
        self
    }

    /// Sign with `credential` and produce the wire request.
    pub(crate) fn sign(self, credential: &CredentialModel) -> Result<HttpRequest> {
        let (Some(access_key_id), Some(access_key_secret)) = (
            credential.access_key_id.as_deref(),
            credential.access_key_secret(),
        ) else {
            return Err(Error::credential(format!(
                "credentials from '{}' carry no AccessKey to sign with",
                credential.provider_name
            )));
        };

        let mut url = endpoint_url(&self.endpoint, "https")?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::config(format!(
                    "endpoint '{}' has no host",
                    self.endpoint
                )));
            }
        };

        let payload_hash = hex::encode(Sha256::digest(b""));
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("x-acs-action".to_string(), self.action.to_string());
        headers.insert("x-acs-version".to_string(), self.version.to_string());
        headers.insert("x-acs-date".to_string(), self.date.clone());
        headers.insert("x-acs-signature-nonce".to_string(), self.nonce.clone());
        headers.insert("x-acs-content-sha256".to_string(), payload_hash.clone());
        if let Some(token) = credential.security_token() {
            headers.insert("x-acs-security-token".to_string(), token.to_string());
        }

        let query = canonical_query(&self.query);
        let canonical = canonical_request(self.method, "/", &query, &headers, &payload_hash);
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let signature = signature(access_key_secret, &string_to_sign(&canonical))?;

        url.set_path("/");
        url.set_query((!query.is_empty()).then_some(query.as_str()));

        let mut request = HttpRequest::new(self.method, url.to_string());
        for (name, value) in headers {
            if name != "host" {
                request = request.header(name, value);
            }
        }
        Ok(request.header(
            "Authorization",
            format!(
                "{} Credential={},SignedHeaders={},Signature={}",
                ALGORITHM, access_key_id, signed_headers, signature
            ),
        ))
    }
}

/// RFC 3986 encoding with keys sorted.
fn canonical_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_request(
    method: Method,
    path: &str,
    query: &str,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        path,
        query,
        canonical_headers,
        signed_headers,
        payload_hash
    )
}

fn string_to_sign(canonical_request: &str) -> String {
    format!(
        "{}\n{}",
        ALGORITHM,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

fn signature(secret: &str, string_to_sign: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::credential(format!("invalid signing key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
