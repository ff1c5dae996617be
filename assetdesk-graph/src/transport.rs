//! HTTP transport seam.
//!
//! [`HttpTransport`] sends exactly one request and reports what came back;
//! retry policy lives in [`crate::executor`]. [`ReqwestTransport`] is the
//! production implementation, [`crate::mock::ScriptedTransport`] the test
//! one.

use assetdesk_core::{BearerToken, TransportError};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// HTTP verbs the access layer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request against the upstream service.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub credential: BearerToken,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl UpstreamRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, credential: BearerToken) -> Self {
        Self {
            method,
            url: url.into(),
            credential,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>, credential: BearerToken) -> Self {
        Self::new(HttpMethod::Get, url, credential)
    }

    pub fn post(url: impl Into<String>, credential: BearerToken, body: Value) -> Self {
        Self::new(HttpMethod::Post, url, credential).with_body(body)
    }

    pub fn patch(url: impl Into<String>, credential: BearerToken, body: Value) -> Self {
        Self::new(HttpMethod::Patch, url, credential).with_body(body)
    }

    pub fn delete(url: impl Into<String>, credential: BearerToken) -> Self {
        Self::new(HttpMethod::Delete, url, credential)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<'a>(mut self, headers: impl IntoIterator<Item = &'a (&'a str, &'a str)>) -> Self {
        for (name, value) in headers {
            self.headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the upstream sent back. Header names are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// JSON response with status 200.
    pub fn json(body: &Value) -> Self {
        Self::new(200, body.to_string())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::InvalidResponse {
            reason: format!("Failed to parse response body: {}", e),
        })
    }
}

/// Sends a single request. Implementations must not retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(AUTHORIZATION, request.credential.authorization())
            .header(ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| TransportError::Network {
            reason: format!("HTTP request failed: {}", e),
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| TransportError::Network {
            reason: format!("Failed to read response body: {}", e),
        })?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish()
    }
}
