//! Declarative provider configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::EntityKind;

/// Business category of an integrated provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderCategory {
    Banking,
    MarketData,
    Fiscal,
    Crm,
    Communication,
    Regulatory,
}

impl ProviderCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderCategory::Banking => "banking",
            ProviderCategory::MarketData => "market-data",
            ProviderCategory::Fiscal => "fiscal",
            ProviderCategory::Crm => "crm",
            ProviderCategory::Communication => "communication",
            ProviderCategory::Regulatory => "regulatory",
        }
    }
}

impl std::fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Authentication scheme declared by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthScheme {
    /// OAuth 2.0. Tokens are refreshed against `token_path` (relative to the
    /// provider base address, or absolute).
    #[serde(rename = "oauth2", rename_all = "camelCase")]
    OAuth2 {
        token_path: String,
        #[serde(default)]
        scopes: Vec<String>,
    },
    /// Static API key sent in a header. The key is the credential's client secret.
    #[serde(rename = "apiKey", rename_all = "camelCase")]
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    /// Static bearer token.
    #[serde(rename = "bearer")]
    Bearer,
    /// HTTP basic authentication with client id / client secret.
    #[serde(rename = "basic")]
    Basic,
}

impl AuthScheme {
    pub fn is_oauth2(&self) -> bool {
        matches!(self, AuthScheme::OAuth2 { .. })
    }
}

/// Quota ceilings for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    /// Advisory only; not enforced separately from the per-minute ceiling.
    #[serde(default)]
    pub burst_limit: u32,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_day: 10_000,
            burst_limit: 10,
        }
    }
}

/// HTTP verb of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Whether leftover params travel in a JSON body rather than the query string.
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a provider's payload maps onto canonical entities.
///
/// `items` is a JSON pointer to the array of items (empty = the body itself).
/// `fields` maps canonical field names (`id`, `name`, `balance`, `currency`,
/// `accountId`, `symbol`, `quantity`, `marketValue`, `amount`, `bookedAt`,
/// `description`) to JSON pointers inside each item. Unmapped fields fall back
/// to `/<canonical name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseShape {
    pub entity: EntityKind,
    #[serde(default)]
    pub items: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ResponseShape {
    /// Pointer for a canonical field inside an item.
    pub fn field_pointer(&self, field: &str) -> String {
        self.fields
            .get(field)
            .cloned()
            .unwrap_or_else(|| format!("/{}", field))
    }
}

/// A named operation exposed by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointTemplate {
    /// Path pattern with `{placeholder}` segments.
    pub path: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub cacheable: bool,
    #[serde(default)]
    pub cache_ttl_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ResponseShape>,
}

impl EndpointTemplate {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: HttpMethod::Get,
            cacheable: false,
            cache_ttl_minutes: 0,
            shape: None,
        }
    }

    /// Marks the endpoint cacheable for `ttl_minutes`.
    pub fn cached(mut self, ttl_minutes: u32) -> Self {
        self.cacheable = true;
        self.cache_ttl_minutes = ttl_minutes;
        self
    }

    pub fn with_shape(mut self, shape: ResponseShape) -> Self {
        self.shape = Some(shape);
        self
    }
}

/// Full configuration of an integrated provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub category: ProviderCategory,
    pub base_url: String,
    #[serde(default)]
    pub version: String,
    pub auth: AuthScheme,
    #[serde(default)]
    pub quota: Quota,
    #[serde(default)]
    pub operations: BTreeMap<String, EndpointTemplate>,
    /// Low-cost operation used for connectivity and health probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_operation: Option<String>,
    /// Operations fanned out by the sync orchestrator for this provider.
    #[serde(default)]
    pub sync_operations: Vec<String>,
}

impl ProviderConfig {
    pub fn operation(&self, name: &str) -> Option<&EndpointTemplate> {
        self.operations.get(name)
    }

    pub fn supports_sync(&self) -> bool {
        !self.sync_operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_deserializes_from_json() {
        let raw = r#"{
            "id": "demo-bank",
            "name": "Demo Bank",
            "category": "banking",
            "baseUrl": "https://api.demo-bank.test",
            "version": "v2",
            "auth": { "type": "oauth2", "tokenPath": "/oauth/token", "scopes": ["accounts"] },
            "quota": { "requestsPerMinute": 2, "requestsPerDay": 100 },
            "operations": {
                "accounts": {
                    "path": "/clients/{subject_id}/accounts",
                    "method": "GET",
                    "cacheable": true,
                    "cacheTtlMinutes": 5,
                    "shape": { "entity": "account", "items": "/data" }
                }
            },
            "probeOperation": "accounts",
            "syncOperations": ["accounts"]
        }"#;

        let config: ProviderConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.category, ProviderCategory::Banking);
        assert!(config.auth.is_oauth2());
        assert_eq!(config.quota.requests_per_minute, 2);
        assert_eq!(config.quota.burst_limit, 0);
        let accounts = config.operation("accounts").unwrap();
        assert!(accounts.cacheable);
        assert_eq!(accounts.method, HttpMethod::Get);
        assert_eq!(
            accounts.shape.as_ref().unwrap().entity,
            EntityKind::Account
        );
        assert!(config.supports_sync());
    }

    #[test]
    fn test_api_key_header_defaults() {
        let auth: AuthScheme = serde_json::from_str(r#"{ "type": "apiKey" }"#).unwrap();
        assert_eq!(
            auth,
            AuthScheme::ApiKey {
                header: "X-API-Key".to_string()
            }
        );
    }

    #[test]
    fn test_field_pointer_fallback() {
        let mut fields = BTreeMap::new();
        fields.insert("balance".to_string(), "/amounts/current".to_string());
        let shape = ResponseShape {
            entity: EntityKind::Account,
            items: String::new(),
            fields,
        };
        assert_eq!(shape.field_pointer("balance"), "/amounts/current");
        assert_eq!(shape.field_pointer("currency"), "/currency");
    }
}
