//! Periodic health probing of active providers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::executor::{ExecuteOptions, RequestExecutor};
use crate::registry::ProviderRegistry;

/// Probes every active provider on a fixed interval.
///
/// Probe failures only change reported health; they never deactivate a
/// provider.
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    executor: Arc<RequestExecutor>,
    interval: Duration,
    options: ExecuteOptions,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        executor: Arc<RequestExecutor>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            interval,
            options: ExecuteOptions::default()
                .without_cache()
                .with_max_retries(0)
                .with_timeout(probe_timeout),
        }
    }

    /// Probe all active providers once, concurrently. Returns how many passed.
    pub async fn check_all(&self) -> usize {
        let providers = self.registry.list_active();
        if providers.is_empty() {
            debug!("[Health] No active providers to probe");
            return 0;
        }

        let probes = providers.iter().map(|provider| async move {
            let result = match &provider.probe_operation {
                Some(operation) => {
                    self.executor
                        .probe(&provider.id, operation, &self.options)
                        .await
                }
                None => self.executor.probe_root(&provider.id, &self.options).await,
            };
            if let Err(e) = &result {
                warn!("[Health] Probe of '{}' failed: {}", provider.id, e);
            }
            result.is_ok()
        });

        let passed = join_all(probes).await.into_iter().filter(|ok| *ok).count();
        info!(
            "[Health] Probed {} providers, {} healthy",
            providers.len(),
            passed
        );
        passed
    }

    /// Run until `shutdown` flips to true. The first check happens after one interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!("[Health] Monitor started ({:?} interval)", self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("[Health] Monitor stopped");
    }
}
