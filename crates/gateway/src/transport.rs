//! HTTP transport seam.
//!
//! The executor never talks to `reqwest` directly; it sends a
//! [`ProviderRequest`] through an [`HttpTransport`]. Production uses
//! [`ReqwestTransport`]; tests script responses. Timeouts are applied by the
//! caller by dropping the future, which cancels the in-flight request.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use serde_json::Value;

use crate::errors::{GatewayError, Result};
use crate::models::HttpMethod;

/// Body of an outbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A fully resolved outbound request.
#[derive(Clone)]
pub struct ProviderRequest {
    pub provider_id: String,
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

// Header values may carry credentials.
impl std::fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRequest")
            .field("provider_id", &self.provider_id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field(
                "headers",
                &self.headers.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Raw provider answer. Non-JSON bodies are kept as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Value,
}

impl ProviderResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("advisor-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to initialize HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn header_map(request: &ProviderRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                GatewayError::Config(format!("Invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| GatewayError::Config(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        debug!("[Transport] {} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(Self::header_map(&request)?);
        builder = match &request.body {
            RequestBody::None => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
        };

        let transport_error = |e: reqwest::Error| GatewayError::Transport {
            provider: request.provider_id.clone(),
            message: e.to_string(),
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ProviderResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_rejects_invalid_names() {
        let request = ProviderRequest {
            provider_id: "x".to_string(),
            method: HttpMethod::Get,
            url: "https://example.test".to_string(),
            headers: vec![("bad header".to_string(), "v".to_string())],
            body: RequestBody::None,
        };
        assert!(ReqwestTransport::header_map(&request).is_err());
    }

    #[test]
    fn test_debug_hides_header_values() {
        let request = ProviderRequest {
            provider_id: "x".to_string(),
            method: HttpMethod::Get,
            url: "https://example.test".to_string(),
            headers: vec![("Authorization".to_string(), "Bearer s3cr3t".to_string())],
            body: RequestBody::None,
        };
        let rendered = format!("{:?}", request);
        assert!(rendered.contains("Authorization"));
        assert!(!rendered.contains("s3cr3t"));
    }

    #[test]
    fn test_success_range() {
        assert!(ProviderResponse::ok(Value::Null).is_success());
        assert!(!ProviderResponse {
            status: 404,
            body: Value::Null
        }
        .is_success());
    }
}
