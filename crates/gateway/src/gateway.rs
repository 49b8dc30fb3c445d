//! The gateway facade.
//!
//! A [`Gateway`] owns one isolated set of components. Nothing is global, so
//! tests can run several gateways side by side. Background work (health
//! probing, webhook consumption, cache sweeping) only runs between
//! [`Gateway::start`] and [`Gateway::stop`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audit::{AuditLog, AuditQuery};
use crate::cache::ResponseCache;
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::credentials::{CredentialManager, OAuth2TokenClient, TokenRefresher};
use crate::errors::{GatewayError, Result};
use crate::executor::{ExecuteOptions, ExecutorComponents, RequestExecutor};
use crate::health::{HealthMonitor, HealthTracker};
use crate::models::{
    ConnectionTest, Credentials, DeadLetter, Params, ProviderConfig, ProviderHealth,
    RequestRecord, SyncResult, TokenState, WebhookEvent,
};
use crate::registry::{ProviderRegistry, RateLimiter, RateUsage};
use crate::store::{
    credentials_key, provider_active_key, provider_key, KeyValueStore, MemoryStore,
    PROVIDER_PREFIX,
};
use crate::sync::{ConsolidatedView, NoOpSyncReporter, SyncConfig, SyncOrchestrator, SyncReporter};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::webhook::{WebhookConfig, WebhookProcessor};

/// A provider as listed to callers. Credentials are never included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub config: ProviderConfig,
    pub active: bool,
    pub has_credentials: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_state: Option<TokenState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_usage: Option<RateUsage>,
}

struct RunningTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Builder for [`Gateway`]. Every seam has a production default.
pub struct GatewayBuilder {
    config: GatewayConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Option<Arc<dyn Clock>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    reporter: Option<Arc<dyn SyncReporter>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            clock: None,
            refresher: None,
            reporter: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn SyncReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Wire the components, register configured providers and restore
    /// persisted state.
    pub fn build(self) -> Result<Gateway> {
        let config = self.config;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store: Arc<dyn KeyValueStore> =
            self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let refresher = self
            .refresher
            .unwrap_or_else(|| Arc::new(OAuth2TokenClient::new(Arc::clone(&transport))));
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(NoOpSyncReporter));

        let registry = Arc::new(ProviderRegistry::new());
        let credentials = Arc::new(
            CredentialManager::new(refresher, Arc::clone(&clock)).with_store(Arc::clone(&store)),
        );
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&clock)));
        let cache = Arc::new(ResponseCache::new(Arc::clone(&clock)));
        let audit = Arc::new(AuditLog::new(config.audit_retention));
        let health = Arc::new(HealthTracker::new(Arc::clone(&clock)));

        let executor = Arc::new(
            RequestExecutor::new(ExecutorComponents {
                registry: Arc::clone(&registry),
                credentials: Arc::clone(&credentials),
                rate_limiter: Arc::clone(&rate_limiter),
                cache: Arc::clone(&cache),
                transport,
                audit: Arc::clone(&audit),
                health: Arc::clone(&health),
                clock: Arc::clone(&clock),
            })
            .with_retry_base_delay(config.retry_base_delay),
        );

        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            reporter,
            Arc::clone(&clock),
            SyncConfig {
                options: ExecuteOptions::default()
                    .without_cache()
                    .with_max_retries(0)
                    .with_timeout(config.sync_timeout),
            },
        ));

        let webhooks = Arc::new(WebhookProcessor::new(
            Arc::clone(&registry),
            orchestrator.clone(),
            Arc::clone(&health),
            Arc::clone(&clock),
            WebhookConfig {
                cadence: config.webhook_cadence,
                resync_delay: config.resync_delay,
                max_attempts: config.max_webhook_attempts,
                ..WebhookConfig::default()
            },
        ));

        let gateway = Gateway {
            config,
            store,
            registry,
            credentials,
            rate_limiter,
            cache,
            audit,
            health,
            executor,
            orchestrator,
            webhooks,
            tasks: Mutex::new(None),
        };
        gateway.load()?;
        Ok(gateway)
    }
}

pub struct Gateway {
    config: GatewayConfig,
    store: Arc<dyn KeyValueStore>,
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialManager>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    audit: Arc<AuditLog>,
    health: Arc<HealthTracker>,
    executor: Arc<RequestExecutor>,
    orchestrator: Arc<SyncOrchestrator>,
    webhooks: Arc<WebhookProcessor>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    fn tasks(&self) -> MutexGuard<'_, Option<RunningTasks>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            warn!("Gateway task lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Startup and persistence
    // ─────────────────────────────────────────────────────────────────────

    fn load(&self) -> Result<()> {
        let mut configured = HashSet::new();
        for provider in self.config.providers.clone() {
            configured.insert(provider.id.clone());
            self.install_provider(provider)?;
        }

        for key in self.store.keys(PROVIDER_PREFIX)? {
            let id = &key[PROVIDER_PREFIX.len()..];
            if configured.contains(id) {
                continue;
            }
            let Some(raw) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_str::<ProviderConfig>(&raw) {
                Ok(provider) => {
                    debug!("[Gateway] Restoring persisted provider '{}'", provider.id);
                    self.install_provider(provider)?;
                }
                Err(e) => warn!("[Gateway] Skipping unreadable provider '{}': {}", id, e),
            }
        }

        for provider in self.registry.list() {
            self.restore_provider_state(&provider.id)?;
        }
        info!(
            "[Gateway] Loaded {} providers ({} active)",
            self.registry.list().len(),
            self.registry.list_active().len()
        );
        Ok(())
    }

    fn restore_provider_state(&self, id: &str) -> Result<()> {
        if let Some(raw) = self.store.get(&credentials_key(id))? {
            match serde_json::from_str::<Credentials>(&raw) {
                Ok(credentials) => self.credentials.set_credentials(id, credentials),
                Err(e) => warn!("[Gateway] Skipping unreadable credentials for '{}': {}", id, e),
            }
        }
        let active = self.store.get(&provider_active_key(id))?.as_deref() == Some("true");
        if active && self.credentials.has_credentials(id) {
            self.registry.restore_active(id)?;
        }
        Ok(())
    }

    fn install_provider(&self, provider: ProviderConfig) -> Result<()> {
        let id = provider.id.clone();
        let quota = provider.quota;
        let raw = serde_json::to_string(&provider)?;
        self.registry.register(provider)?;
        self.rate_limiter.configure(&id, quota);
        self.store.set(&provider_key(&id), &raw)
    }

    fn persist_activation(&self, id: &str, active: bool) -> Result<()> {
        self.store
            .set(&provider_active_key(id), if active { "true" } else { "false" })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Start the background tasks. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks();
        if tasks.is_some() {
            debug!("[Gateway] Already started");
            return;
        }
        let (shutdown, receiver) = watch::channel(false);

        let monitor = HealthMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.executor),
            self.config.health_check_interval,
            self.config.default_options.timeout,
        );
        let health_task = tokio::spawn(monitor.run(receiver.clone()));
        let webhook_task = tokio::spawn(Arc::clone(&self.webhooks).run(receiver.clone()));
        let sweep_task = tokio::spawn(sweep_cache(
            Arc::clone(&self.cache),
            self.config.cache_sweep_interval,
            receiver,
        ));

        *tasks = Some(RunningTasks {
            shutdown,
            handles: vec![health_task, webhook_task, sweep_task],
        });
        info!("[Gateway] Started");
    }

    /// Stop the background tasks and wait for them to finish.
    pub async fn stop(&self) {
        let Some(running) = self.tasks().take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        for handle in running.handles {
            if let Err(e) = handle.await {
                warn!("[Gateway] Background task ended abnormally: {}", e);
            }
        }
        info!("[Gateway] Stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks().is_some()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound interface
    // ─────────────────────────────────────────────────────────────────────

    /// Execute one provider operation. `None` options use the configured defaults.
    pub async fn execute(
        &self,
        provider_id: &str,
        operation: &str,
        params: &Params,
        options: Option<ExecuteOptions>,
    ) -> Result<Value> {
        let options = options.unwrap_or(self.config.default_options);
        self.executor
            .execute(provider_id, operation, params, &options)
            .await
    }

    /// Sync a subject across `selection`, or all active sync-capable providers.
    pub async fn sync_all(
        &self,
        subject_id: &str,
        selection: Option<&[String]>,
        force: bool,
    ) -> Result<SyncResult> {
        self.orchestrator
            .sync_all(subject_id, selection, force)
            .await
    }

    pub fn consolidated(&self, subject_id: &str) -> Option<ConsolidatedView> {
        self.orchestrator.consolidated(subject_id)
    }

    fn probe_options(&self) -> ExecuteOptions {
        self.config
            .default_options
            .without_cache()
            .with_max_retries(0)
    }

    async fn run_probe(&self, provider: &ProviderConfig) -> Result<Value> {
        let options = self.probe_options();
        match &provider.probe_operation {
            Some(operation) => self.executor.probe(&provider.id, operation, &options).await,
            None => self.executor.probe_root(&provider.id, &options).await,
        }
    }

    /// Install credentials and activate a provider after a passing probe.
    ///
    /// On a failed probe the credentials are discarded, the provider stays
    /// (or becomes) inactive and [`GatewayError::Activation`] is returned.
    pub async fn activate(&self, provider_id: &str, credentials: Credentials) -> Result<()> {
        let provider = self.registry.get(provider_id)?;
        info!("[Gateway] Activating '{}'", provider_id);
        self.credentials.set_credentials(provider_id, credentials);

        match self.run_probe(&provider).await {
            Ok(_) => {
                self.registry.record_probe(provider_id, true)?;
                self.registry.set_active(provider_id, true)?;
                if let Some(snapshot) = self.credentials.snapshot(provider_id).await {
                    self.store.set(
                        &credentials_key(provider_id),
                        &serde_json::to_string(&snapshot)?,
                    )?;
                }
                self.persist_activation(provider_id, true)?;
                Ok(())
            }
            Err(err) => {
                warn!("[Gateway] Activation of '{}' failed: {}", provider_id, err);
                self.registry.set_active(provider_id, false)?;
                self.credentials.remove(provider_id);
                self.store.delete(&credentials_key(provider_id))?;
                self.persist_activation(provider_id, false)?;
                Err(GatewayError::Activation {
                    provider: provider_id.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Deactivate a provider. Later calls fail with `ProviderInactive`.
    pub fn deactivate(&self, provider_id: &str) -> Result<()> {
        self.registry.set_active(provider_id, false)?;
        self.cache.invalidate_provider(provider_id);
        self.persist_activation(provider_id, false)
    }

    /// Probe a provider with its current credentials and report the outcome.
    pub async fn test_connection(&self, provider_id: &str) -> Result<ConnectionTest> {
        let provider = self.registry.get(provider_id)?;
        let started = Instant::now();
        let outcome = self.run_probe(&provider).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        Ok(match outcome {
            Ok(_) => ConnectionTest {
                success: true,
                message: format!("Connected to {}", provider.name),
                latency_ms: Some(latency_ms),
            },
            Err(e) => ConnectionTest {
                success: false,
                message: e.to_string(),
                latency_ms: None,
            },
        })
    }

    /// Audit records, newest first, optionally for one provider.
    pub fn get_history(&self, provider_id: Option<&str>, limit: usize) -> Vec<RequestRecord> {
        let query = AuditQuery {
            provider_id: provider_id.map(str::to_string),
            ..AuditQuery::default()
        };
        self.audit.query(&query, limit)
    }

    pub fn query_history(&self, query: &AuditQuery, limit: usize) -> Vec<RequestRecord> {
        self.audit.query(query, limit)
    }

    /// Health of every registered provider, `unknown` when never checked.
    pub fn get_health(&self) -> Vec<ProviderHealth> {
        let providers = self.registry.list();
        self.health
            .snapshot(providers.iter().map(|p| p.id.as_str()))
    }

    /// Enqueue a webhook event; never processes on the caller's task.
    pub fn on_webhook(&self, event: WebhookEvent) -> Result<()> {
        self.webhooks.on_webhook(event)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.webhooks.dead_letters()
    }

    pub fn webhook_queue_len(&self) -> usize {
        self.webhooks.queue_len()
    }

    /// Register (or replace) a provider at runtime. It starts inactive.
    pub fn register_provider(&self, provider: ProviderConfig) -> Result<()> {
        let id = provider.id.clone();
        self.install_provider(provider)?;
        self.credentials.remove(&id);
        self.cache.invalidate_provider(&id);
        self.health.clear(&id);
        self.persist_activation(&id, false)
    }

    pub async fn list_providers(&self) -> Vec<ProviderStatus> {
        let mut out = Vec::new();
        for provider in self.registry.list() {
            let id = provider.id.as_str();
            out.push(ProviderStatus {
                active: self.registry.is_active(id).unwrap_or(false),
                has_credentials: self.credentials.has_credentials(id),
                token_state: self.credentials.token_state(id).await,
                rate_usage: self.rate_limiter.usage(id),
                config: provider.as_ref().clone(),
            });
        }
        out
    }

    pub fn provider(&self, provider_id: &str) -> Result<Arc<ProviderConfig>> {
        self.registry.get(provider_id)
    }

    pub fn is_active(&self, provider_id: &str) -> Result<bool> {
        self.registry.is_active(provider_id)
    }
}

async fn sweep_cache(
    cache: Arc<ResponseCache>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cache.sweep();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
