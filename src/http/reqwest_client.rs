//! reqwest-backed [`HttpClient`].

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;

use super::{DEFAULT_CONNECT_TIMEOUT, HttpClient, HttpRequest, HttpResponse, Method};
use crate::{Error, Result};

const USER_AGENT: &str = concat!("alibabacloud-credentials-rust/", env!("CARGO_PKG_VERSION"));

/// Async reqwest client plus a blocking one created on first blocking use,
/// so constructing this type inside a runtime is safe.
#[derive(Debug)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            blocking: OnceLock::new(),
        }
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let built = reqwest::blocking::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(self.blocking.get_or_init(|| built))
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
    }
}

fn map_error(error: reqwest::Error, timeout: Duration) -> Error {
    if error.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Network(error)
    }
}

fn collect_headers(
    headers: &reqwest::header::HeaderMap,
) -> std::collections::HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let timeout = request.total_timeout();
        let mut builder = self
            .client
            .request(reqwest_method(request.method), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| map_error(e, timeout))?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await.map_err(|e| map_error(e, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn send_blocking(&self, request: HttpRequest) -> Result<HttpResponse> {
        let timeout = request.total_timeout();
        let mut builder = self
            .blocking_client()?
            .request(reqwest_method(request.method), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().map_err(|e| map_error(e, timeout))?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().map_err(|e| map_error(e, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
