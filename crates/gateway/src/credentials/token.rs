//! OAuth2 token endpoint client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error};
use serde::Deserialize;

use crate::errors::{GatewayError, Result};
use crate::models::{AuthScheme, Credentials, HttpMethod, ProviderConfig};
use crate::transport::{HttpTransport, ProviderRequest, RequestBody};

/// Tokens granted by a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
}

/// Obtains fresh tokens for an OAuth2 provider.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        provider: &ProviderConfig,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Standard RFC 6749 token client.
///
/// Uses the `refresh_token` grant when a refresh token is held and falls back
/// to `client_credentials` otherwise.
pub struct OAuth2TokenClient {
    transport: Arc<dyn HttpTransport>,
}

impl OAuth2TokenClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    fn token_url(provider: &ProviderConfig, token_path: &str) -> String {
        if token_path.starts_with("http://") || token_path.starts_with("https://") {
            token_path.to_string()
        } else {
            format!(
                "{}/{}",
                provider.base_url.trim_end_matches('/'),
                token_path.trim_start_matches('/')
            )
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuth2TokenClient {
    async fn refresh(
        &self,
        provider: &ProviderConfig,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant> {
        let AuthScheme::OAuth2 { token_path, scopes } = &provider.auth else {
            return Err(GatewayError::Auth {
                provider: provider.id.clone(),
                message: "provider does not use OAuth2".to_string(),
            });
        };

        let mut form = vec![
            ("client_id".to_string(), credentials.client_id.clone()),
            ("client_secret".to_string(), credentials.client_secret.clone()),
        ];
        match &credentials.refresh_token {
            Some(refresh_token) => {
                form.push(("grant_type".to_string(), "refresh_token".to_string()));
                form.push(("refresh_token".to_string(), refresh_token.clone()));
            }
            None => {
                form.push(("grant_type".to_string(), "client_credentials".to_string()));
                let requested = if credentials.scopes.is_empty() {
                    scopes
                } else {
                    &credentials.scopes
                };
                if !requested.is_empty() {
                    form.push(("scope".to_string(), requested.join(" ")));
                }
            }
        }

        let url = Self::token_url(provider, token_path);
        debug!("[Credentials] Refreshing token for '{}' at {}", provider.id, url);

        let response = self
            .transport
            .send(ProviderRequest {
                provider_id: provider.id.clone(),
                method: HttpMethod::Post,
                url,
                headers: Vec::new(),
                body: RequestBody::Form(form),
            })
            .await
            .map_err(|e| GatewayError::Auth {
                provider: provider.id.clone(),
                message: format!("token endpoint unreachable: {}", e),
            })?;

        if !response.is_success() {
            let detail = serde_json::from_value::<TokenErrorResponse>(response.body.clone())
                .ok()
                .and_then(|err| err.error_description.or(err.error))
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            error!(
                "[Credentials] Token refresh for '{}' failed: {}",
                provider.id, detail
            );
            return Err(GatewayError::Auth {
                provider: provider.id.clone(),
                message: detail,
            });
        }

        let token: TokenResponse =
            serde_json::from_value(response.body).map_err(|e| GatewayError::Auth {
                provider: provider.id.clone(),
                message: format!("malformed token response: {}", e),
            })?;

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|secs| now + Duration::seconds(secs)),
            scopes: token
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_string).collect()),
        })
    }
}
