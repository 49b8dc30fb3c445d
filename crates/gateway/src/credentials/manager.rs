//! Per-provider credential ownership and token refresh.
//!
//! Each provider has one slot guarded by an async mutex. A caller that finds
//! an expired OAuth2 token refreshes it while holding the slot, so concurrent
//! callers for the same provider wait for that single refresh and then reuse
//! its result instead of issuing their own.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use super::token::TokenRefresher;
use crate::clock::Clock;
use crate::errors::{GatewayError, Result};
use crate::models::{AuthHeaders, AuthScheme, Credentials, ProviderConfig, TokenState};
use crate::store::{credentials_key, KeyValueStore};

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
struct CredentialSlot {
    credentials: Credentials,
    state: TokenState,
}

/// Owns provider credentials and hands out auth headers.
pub struct CredentialManager {
    slots: DashMap<String, Arc<Mutex<CredentialSlot>>>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn KeyValueStore>>,
    refresh_timeout: Duration,
}

impl CredentialManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            refresher,
            clock,
            store: None,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Persist refreshed tokens to `store`.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    fn initial_state(&self, credentials: &Credentials) -> TokenState {
        match &credentials.access_token {
            None => TokenState::None,
            Some(_) if credentials.is_expired(self.clock.now()) => TokenState::Expired,
            Some(_) => TokenState::Valid,
        }
    }

    /// Install (or replace) a provider's credentials.
    pub fn set_credentials(&self, provider_id: &str, credentials: Credentials) {
        let state = self.initial_state(&credentials);
        debug!(
            "[Credentials] Installing credentials for '{}' ({:?})",
            provider_id, state
        );
        self.slots.insert(
            provider_id.to_string(),
            Arc::new(Mutex::new(CredentialSlot { credentials, state })),
        );
    }

    pub fn remove(&self, provider_id: &str) {
        self.slots.remove(provider_id);
    }

    pub fn has_credentials(&self, provider_id: &str) -> bool {
        self.slots.contains_key(provider_id)
    }

    /// Current token state, `None` if no credentials are held.
    pub async fn token_state(&self, provider_id: &str) -> Option<TokenState> {
        let slot = self.slot(provider_id).ok()?;
        let guard = slot.lock().await;
        if guard.state == TokenState::Valid && guard.credentials.is_expired(self.clock.now()) {
            return Some(TokenState::Expired);
        }
        Some(guard.state)
    }

    /// Snapshot of the stored credentials, for persistence inside the gateway.
    pub(crate) async fn snapshot(&self, provider_id: &str) -> Option<Credentials> {
        let slot = self.slot(provider_id).ok()?;
        let guard = slot.lock().await;
        Some(guard.credentials.clone())
    }

    fn slot(&self, provider_id: &str) -> Result<Arc<Mutex<CredentialSlot>>> {
        self.slots
            .get(provider_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GatewayError::Auth {
                provider: provider_id.to_string(),
                message: "no credentials configured".to_string(),
            })
    }

    /// Authentication headers for a call to `provider`.
    ///
    /// OAuth2 tokens that are absent or expired (`now >= expires_at`) are
    /// refreshed first. A failed refresh revokes the slot and returns
    /// [`GatewayError::Auth`]; stale headers are never returned.
    pub async fn headers_for(&self, provider: &ProviderConfig) -> Result<AuthHeaders> {
        let slot = self.slot(&provider.id)?;
        let mut guard = slot.lock().await;

        if guard.state == TokenState::Revoked {
            return Err(GatewayError::Auth {
                provider: provider.id.clone(),
                message: "credentials revoked; reactivate the provider".to_string(),
            });
        }

        if provider.auth.is_oauth2() && guard.credentials.is_expired(self.clock.now()) {
            if guard.state == TokenState::Valid {
                guard.state = TokenState::Expired;
            }
            self.refresh_locked(provider, &mut guard).await?;
        }

        build_headers(provider, &guard.credentials)
    }

    async fn refresh_locked(
        &self,
        provider: &ProviderConfig,
        slot: &mut CredentialSlot,
    ) -> Result<()> {
        let now = self.clock.now();
        let outcome = tokio::time::timeout(
            self.refresh_timeout,
            self.refresher.refresh(provider, &slot.credentials, now),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GatewayError::Auth {
                provider: provider.id.clone(),
                message: "token refresh timed out".to_string(),
            })
        });

        match outcome {
            Ok(grant) => {
                slot.credentials.access_token = Some(grant.access_token);
                if grant.refresh_token.is_some() {
                    slot.credentials.refresh_token = grant.refresh_token;
                }
                if let Some(scopes) = grant.scopes {
                    slot.credentials.scopes = scopes;
                }
                slot.credentials.expires_at = grant.expires_at;
                slot.state = TokenState::Valid;
                info!("[Credentials] Token refreshed for '{}'", provider.id);
                self.persist(&provider.id, &slot.credentials);
                Ok(())
            }
            Err(err) => {
                slot.state = TokenState::Revoked;
                error!(
                    "[Credentials] Token refresh for '{}' failed, revoking: {}",
                    provider.id, err
                );
                Err(match err {
                    GatewayError::Auth { .. } => err,
                    other => GatewayError::Auth {
                        provider: provider.id.clone(),
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    fn persist(&self, provider_id: &str, credentials: &Credentials) {
        let Some(store) = &self.store else {
            return;
        };
        let result = serde_json::to_string(credentials)
            .map_err(GatewayError::from)
            .and_then(|json| store.set(&credentials_key(provider_id), &json));
        if let Err(e) = result {
            warn!(
                "[Credentials] Failed to persist refreshed token for '{}': {}",
                provider_id, e
            );
        }
    }
}

fn build_headers(provider: &ProviderConfig, credentials: &Credentials) -> Result<AuthHeaders> {
    let mut headers = AuthHeaders::new();
    match &provider.auth {
        AuthScheme::OAuth2 { .. } => {
            let token = credentials
                .access_token
                .as_deref()
                .ok_or_else(|| GatewayError::Auth {
                    provider: provider.id.clone(),
                    message: "no access token".to_string(),
                })?;
            headers.insert("Authorization", format!("Bearer {}", token));
        }
        AuthScheme::Bearer => {
            let token = credentials
                .access_token
                .as_deref()
                .unwrap_or(&credentials.client_secret);
            headers.insert("Authorization", format!("Bearer {}", token));
        }
        AuthScheme::ApiKey { header } => {
            headers.insert(header.clone(), credentials.client_secret.clone());
        }
        AuthScheme::Basic => {
            let raw = format!("{}:{}", credentials.client_id, credentials.client_secret);
            headers.insert("Authorization", format!("Basic {}", BASE64.encode(raw)));
        }
    }
    Ok(headers)
}
