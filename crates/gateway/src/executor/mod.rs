//! Request executor: the single funnel to the network.
//!
//! Every outbound call goes through [`RequestExecutor::execute`]:
//! 1. Resolve provider and operation; refuse inactive providers
//! 2. Serve cacheable operations from the response cache
//! 3. Reserve a quota slot, refusing before any network attempt when full
//! 4. Obtain auth headers (may refresh an OAuth2 token)
//! 5. Send the request under a hard timeout
//! 6. Map non-2xx answers to [`GatewayError::Upstream`]
//! 7. On success: fill the cache, audit, mark healthy
//! 8. On failure: audit, retry transient failures with backoff, degrade health

mod request;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::cache::{cache_key, ResponseCache};
use crate::clock::Clock;
use crate::credentials::CredentialManager;
use crate::errors::{GatewayError, Result, RetryClass};
use crate::health::HealthTracker;
use crate::models::{
    EndpointTemplate, Params, ProviderConfig, RequestRecord, RequestStatus, TokenState,
};
use crate::registry::{ProviderRegistry, RateLimiter};
use crate::transport::{HttpTransport, ProviderRequest};

/// Per-call options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteOptions {
    pub use_cache: bool,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl ExecuteOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Durations travel as integer milliseconds in JSON.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallMode {
    Normal,
    /// Connectivity probe: allowed on inactive providers, never cached.
    Probe,
}

/// Shared components the executor funnels every call through.
pub struct ExecutorComponents {
    pub registry: Arc<ProviderRegistry>,
    pub credentials: Arc<CredentialManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub transport: Arc<dyn HttpTransport>,
    pub audit: Arc<AuditLog>,
    pub health: Arc<HealthTracker>,
    pub clock: Arc<dyn Clock>,
}

pub struct RequestExecutor {
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialManager>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    transport: Arc<dyn HttpTransport>,
    audit: Arc<AuditLog>,
    health: Arc<HealthTracker>,
    clock: Arc<dyn Clock>,
    retry_base_delay: Duration,
}

struct Attempt<'a> {
    request_id: &'a str,
    provider_id: &'a str,
    operation: &'a str,
    retry_count: u32,
}

impl RequestExecutor {
    pub fn new(components: ExecutorComponents) -> Self {
        Self {
            registry: components.registry,
            credentials: components.credentials,
            rate_limiter: components.rate_limiter,
            cache: components.cache,
            transport: components.transport,
            audit: components.audit,
            health: components.health,
            clock: components.clock,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    /// Base of the exponential backoff: attempt `n` waits `base * 2^n`.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Execute `operation` on `provider_id`.
    pub async fn execute(
        &self,
        provider_id: &str,
        operation: &str,
        params: &Params,
        options: &ExecuteOptions,
    ) -> Result<Value> {
        self.run(provider_id, operation, params, options, CallMode::Normal)
            .await
    }

    /// Run a connectivity probe against `operation`.
    ///
    /// Skips the active check and the cache; still rate-checked, authenticated
    /// and audited like any other call.
    pub async fn probe(
        &self,
        provider_id: &str,
        operation: &str,
        options: &ExecuteOptions,
    ) -> Result<Value> {
        self.run(provider_id, operation, &Params::new(), options, CallMode::Probe)
            .await
    }

    /// Probe with an ad-hoc `GET /` for providers that declare no probe operation.
    pub(crate) async fn probe_root(
        &self,
        provider_id: &str,
        options: &ExecuteOptions,
    ) -> Result<Value> {
        let entry = self.registry.entry(provider_id)?;
        let config = Arc::clone(entry.config());
        let template = EndpointTemplate::get("/");
        self.run_resolved(
            &config,
            "probe",
            &template,
            &Params::new(),
            options,
            CallMode::Probe,
        )
        .await
    }

    async fn run(
        &self,
        provider_id: &str,
        operation: &str,
        params: &Params,
        options: &ExecuteOptions,
        mode: CallMode,
    ) -> Result<Value> {
        let entry = self.registry.entry(provider_id)?;
        let config = Arc::clone(entry.config());
        let template = config
            .operation(operation)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownOperation {
                provider: provider_id.to_string(),
                operation: operation.to_string(),
            })?;
        self.run_resolved(&config, operation, &template, params, options, mode)
            .await
    }

    async fn run_resolved(
        &self,
        config: &ProviderConfig,
        operation: &str,
        template: &EndpointTemplate,
        params: &Params,
        options: &ExecuteOptions,
        mode: CallMode,
    ) -> Result<Value> {
        let provider_id = config.id.as_str();
        let entry = self.registry.entry(provider_id)?;
        if mode == CallMode::Normal && !entry.is_active() {
            return Err(GatewayError::ProviderInactive(provider_id.to_string()));
        }

        let request_id = Uuid::new_v4().to_string();

        let key = (mode == CallMode::Normal && options.use_cache && template.cacheable)
            .then(|| cache_key(provider_id, operation, params));
        if let Some(key) = &key {
            if let Some(value) = self.cache.get(key) {
                debug!("[Executor] Cache hit for {}.{}", provider_id, operation);
                self.audit.record(RequestRecord {
                    id: request_id,
                    provider_id: provider_id.to_string(),
                    operation: operation.to_string(),
                    timestamp: self.clock.now(),
                    status: RequestStatus::Success,
                    latency_ms: 0,
                    retry_count: 0,
                    cached: true,
                    status_code: None,
                    error: None,
                });
                return Ok(value);
            }
        }

        let mut retry_count = 0u32;
        loop {
            let attempt = Attempt {
                request_id: &request_id,
                provider_id,
                operation,
                retry_count,
            };

            // Deactivation between retries must stop the call
            if mode == CallMode::Normal && retry_count > 0 && !entry.is_active() {
                return Err(GatewayError::ProviderInactive(provider_id.to_string()));
            }

            if !self.rate_limiter.try_acquire(provider_id) {
                let err = GatewayError::RateLimited {
                    provider: provider_id.to_string(),
                };
                warn!("[Executor] {}.{} refused: rate limited", provider_id, operation);
                self.finish(&attempt, RequestStatus::Error, 0, Some(&err));
                return Err(err);
            }

            let started = Instant::now();
            let outcome = self.attempt(config, template, params, options.timeout).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(value) => {
                    if let Some(key) = key {
                        self.cache.set(key, value.clone(), template.cache_ttl_minutes);
                    }
                    self.finish(&attempt, RequestStatus::Success, latency_ms, None);
                    self.health.record_success(provider_id, latency_ms);
                    debug!(
                        "[Executor] {}.{} succeeded in {}ms (retries: {})",
                        provider_id, operation, latency_ms, retry_count
                    );
                    return Ok(value);
                }
                Err(err) => {
                    let status = if matches!(err, GatewayError::Timeout { .. }) {
                        RequestStatus::Timeout
                    } else {
                        RequestStatus::Error
                    };
                    self.finish(&attempt, status, latency_ms, Some(&err));

                    if matches!(err, GatewayError::Auth { .. }) {
                        self.handle_auth_failure(provider_id, mode, &err).await;
                        return Err(err);
                    }

                    if err.retry_class() == RetryClass::WithBackoff
                        && retry_count < options.max_retries
                    {
                        let delay = self.backoff(retry_count);
                        warn!(
                            "[Executor] {}.{} failed ({}), retry {}/{} in {:?}",
                            provider_id,
                            operation,
                            err,
                            retry_count + 1,
                            options.max_retries,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        retry_count += 1;
                        continue;
                    }

                    warn!(
                        "[Executor] {}.{} failed after {} attempt(s): {}",
                        provider_id,
                        operation,
                        retry_count + 1,
                        err
                    );
                    self.health.record_failure(provider_id, &err);
                    return Err(err);
                }
            }
        }
    }

    async fn prepare(
        &self,
        config: &ProviderConfig,
        template: &EndpointTemplate,
        params: &Params,
    ) -> Result<ProviderRequest> {
        let auth = self.credentials.headers_for(config).await?;
        request::build_request(config, template, params, &auth)
    }

    async fn attempt(
        &self,
        config: &ProviderConfig,
        template: &EndpointTemplate,
        params: &Params,
        timeout: Duration,
    ) -> Result<Value> {
        let request = match self.prepare(config, template, params).await {
            Ok(request) => request,
            Err(err) => {
                // Nothing was sent, so the reserved slot goes back
                self.rate_limiter.release(&config.id);
                return Err(err);
            }
        };
        debug!("[Executor] {} {}", request.method, request.url);

        // Dropping the send future on timeout cancels the in-flight request
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| GatewayError::Timeout {
                provider: config.id.clone(),
            })??;

        if response.is_success() {
            Ok(response.body)
        } else {
            Err(GatewayError::Upstream {
                provider: config.id.clone(),
                status: response.status,
                message: request::upstream_message(&response.body),
            })
        }
    }

    /// A revoked token forces the provider inactive until an operator reactivates it.
    async fn handle_auth_failure(&self, provider_id: &str, mode: CallMode, err: &GatewayError) {
        self.health.record_failure(provider_id, err);
        if mode == CallMode::Probe {
            return;
        }
        if self.credentials.token_state(provider_id).await == Some(TokenState::Revoked) {
            if let Err(e) = self.registry.set_active(provider_id, false) {
                warn!("[Executor] Failed to deactivate '{}': {}", provider_id, e);
            } else {
                info!(
                    "[Executor] Provider '{}' deactivated after credential revocation",
                    provider_id
                );
            }
        }
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
    }

    fn finish(
        &self,
        attempt: &Attempt<'_>,
        status: RequestStatus,
        latency_ms: u64,
        error: Option<&GatewayError>,
    ) {
        self.audit.record(RequestRecord {
            id: attempt.request_id.to_string(),
            provider_id: attempt.provider_id.to_string(),
            operation: attempt.operation.to_string(),
            timestamp: self.clock.now(),
            status,
            latency_ms,
            retry_count: attempt.retry_count,
            cached: false,
            status_code: error.and_then(GatewayError::status),
            error: error.map(|e| e.to_string()),
        });
    }
}
