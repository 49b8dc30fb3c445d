//! Per-provider health status derived from call outcomes.

use std::sync::Arc;

use dashmap::DashMap;
use log::warn;

use crate::clock::Clock;
use crate::errors::GatewayError;
use crate::models::{HealthStatus, ProviderHealth};

/// Health status a failure class maps to.
///
/// Timeouts and most 4xx answers are `Warning`: the provider is reachable
/// but the call did not go through. Rejected credentials, 5xx answers and
/// transport failures are `Error`.
pub fn status_for_failure(error: &GatewayError) -> HealthStatus {
    match error {
        GatewayError::Timeout { .. } => HealthStatus::Warning,
        GatewayError::Upstream { status, .. } if *status == 401 || *status == 403 => {
            HealthStatus::Error
        }
        GatewayError::Upstream { status, .. } if *status < 500 => HealthStatus::Warning,
        GatewayError::RateLimited { .. } => HealthStatus::Warning,
        _ => HealthStatus::Error,
    }
}

/// Per-provider health, updated by the executor and the monitor.
pub struct HealthTracker {
    entries: DashMap<String, ProviderHealth>,
    clock: Arc<dyn Clock>,
}

impl HealthTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn record_success(&self, provider_id: &str, latency_ms: u64) {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderHealth::unknown(provider_id));
        entry.status = HealthStatus::Healthy;
        entry.last_checked = Some(now);
        entry.last_latency_ms = Some(latency_ms);
        entry.message = None;
    }

    /// Degrade a provider after a failed call. The last successful latency is kept.
    pub fn record_failure(&self, provider_id: &str, error: &GatewayError) {
        let status = status_for_failure(error);
        if status == HealthStatus::Error {
            warn!("[Health] Provider '{}' marked error: {}", provider_id, error);
        }
        self.set(provider_id, status, Some(error.to_string()));
    }

    pub fn set(&self, provider_id: &str, status: HealthStatus, message: Option<String>) {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderHealth::unknown(provider_id));
        entry.status = status;
        entry.last_checked = Some(now);
        entry.message = message;
    }

    pub fn clear(&self, provider_id: &str) {
        self.entries.remove(provider_id);
    }

    pub fn get(&self, provider_id: &str) -> ProviderHealth {
        self.entries
            .get(provider_id)
            .map(|entry| entry.clone())
            .unwrap_or_else(|| ProviderHealth::unknown(provider_id))
    }

    /// Health for each id, `unknown` for providers never checked.
    pub fn snapshot<'a>(&self, provider_ids: impl IntoIterator<Item = &'a str>) -> Vec<ProviderHealth> {
        provider_ids.into_iter().map(|id| self.get(id)).collect()
    }
}
