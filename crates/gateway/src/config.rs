//! Static gateway configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, Result};
use crate::executor::{duration_ms, ExecuteOptions};
use crate::models::ProviderConfig;

fn default_audit_retention() -> usize {
    crate::audit::DEFAULT_RETENTION
}

fn default_health_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_webhook_cadence() -> Duration {
    Duration::from_secs(1)
}

fn default_resync_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_webhook_attempts() -> u32 {
    5
}

fn default_cache_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Providers plus tunables. Durations are expressed in milliseconds in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Maximum audit records kept; the oldest are pruned past it.
    #[serde(default = "default_audit_retention")]
    pub audit_retention: usize,
    #[serde(default = "default_health_interval", with = "duration_ms")]
    pub health_check_interval: Duration,
    #[serde(default = "default_webhook_cadence", with = "duration_ms")]
    pub webhook_cadence: Duration,
    #[serde(default = "default_resync_delay", with = "duration_ms")]
    pub resync_delay: Duration,
    #[serde(default = "default_max_webhook_attempts")]
    pub max_webhook_attempts: u32,
    #[serde(default = "default_cache_sweep_interval", with = "duration_ms")]
    pub cache_sweep_interval: Duration,
    /// Options applied when a caller passes none.
    #[serde(default)]
    pub default_options: ExecuteOptions,
    /// Backoff base: retry `n` waits `retryBaseDelay * 2^n`.
    #[serde(default = "default_retry_base_delay", with = "duration_ms")]
    pub retry_base_delay: Duration,
    /// Per-provider timeout during orchestrated syncs.
    #[serde(default = "default_sync_timeout", with = "duration_ms")]
    pub sync_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            audit_retention: default_audit_retention(),
            health_check_interval: default_health_interval(),
            webhook_cadence: default_webhook_cadence(),
            resync_delay: default_resync_delay(),
            max_webhook_attempts: default_max_webhook_attempts(),
            cache_sweep_interval: default_cache_sweep_interval(),
            default_options: ExecuteOptions::default(),
            retry_base_delay: default_retry_base_delay(),
            sync_timeout: default_sync_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn with_providers(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers,
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| GatewayError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }
}
