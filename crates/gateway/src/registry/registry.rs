//! Provider registry.
//!
//! Holds the declarative configuration of every integrated provider and its
//! activation state. Read-mostly after startup: registration and
//! activation/deactivation are the only writes, and providers are never
//! removed while the process runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};

use crate::errors::{GatewayError, Result};
use crate::models::ProviderConfig;

/// A registered provider and its mutable flags.
#[derive(Debug)]
pub struct RegisteredProvider {
    config: Arc<ProviderConfig>,
    active: AtomicBool,
    probe_passed: AtomicBool,
}

impl RegisteredProvider {
    fn new(config: ProviderConfig) -> Self {
        Self {
            config: Arc::new(config),
            active: AtomicBool::new(false),
            probe_passed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Arc<ProviderConfig> {
        &self.config
    }

    /// Live activation flag; read at call time, never cached by callers.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Registry of provider configurations.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<RegisteredProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the providers map for reading, recovering from poison if necessary.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RegisteredProvider>>> {
        self.providers.read().unwrap_or_else(|poisoned| {
            warn!("Provider registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RegisteredProvider>>> {
        self.providers.write().unwrap_or_else(|poisoned| {
            warn!("Provider registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register a provider.
    ///
    /// Re-registering an id replaces its configuration; the new entry starts
    /// inactive and needs a fresh probe.
    pub fn register(&self, config: ProviderConfig) -> Result<()> {
        if config.id.trim().is_empty() {
            return Err(GatewayError::Config("Provider id must not be empty".into()));
        }
        if let Some(probe) = &config.probe_operation {
            if config.operation(probe).is_none() {
                return Err(GatewayError::Config(format!(
                    "Provider {} declares unknown probe operation '{}'",
                    config.id, probe
                )));
            }
        }
        if let Some(missing) = config
            .sync_operations
            .iter()
            .find(|op| config.operation(op).is_none())
        {
            return Err(GatewayError::Config(format!(
                "Provider {} declares unknown sync operation '{}'",
                config.id, missing
            )));
        }

        info!(
            "[Registry] Registering provider '{}' ({}, {} operations)",
            config.id,
            config.category,
            config.operations.len()
        );
        let id = config.id.clone();
        self.write()
            .insert(id, Arc::new(RegisteredProvider::new(config)));
        Ok(())
    }

    pub(crate) fn entry(&self, id: &str) -> Result<Arc<RegisteredProvider>> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProvider(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Result<Arc<ProviderConfig>> {
        self.entry(id).map(|entry| Arc::clone(entry.config()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// All providers, ordered by id.
    pub fn list(&self) -> Vec<Arc<ProviderConfig>> {
        let mut configs: Vec<_> = self
            .read()
            .values()
            .map(|entry| Arc::clone(entry.config()))
            .collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    /// Active providers, ordered by id.
    pub fn list_active(&self) -> Vec<Arc<ProviderConfig>> {
        let mut configs: Vec<_> = self
            .read()
            .values()
            .filter(|entry| entry.is_active())
            .map(|entry| Arc::clone(entry.config()))
            .collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    pub fn is_active(&self, id: &str) -> Result<bool> {
        self.entry(id).map(|entry| entry.is_active())
    }

    /// Record the outcome of a connectivity probe.
    pub fn record_probe(&self, id: &str, passed: bool) -> Result<()> {
        self.entry(id)?
            .probe_passed
            .store(passed, Ordering::Release);
        Ok(())
    }

    /// Activate or deactivate a provider.
    ///
    /// Activation requires a prior passing probe. Deactivation also clears the
    /// probe result, so reactivating needs a new probe.
    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let entry = self.entry(id)?;
        if active {
            if !entry.probe_passed.load(Ordering::Acquire) {
                return Err(GatewayError::Activation {
                    provider: id.to_string(),
                    message: "no passing connectivity probe".to_string(),
                });
            }
            entry.active.store(true, Ordering::Release);
            info!("[Registry] Provider '{}' activated", id);
        } else {
            entry.active.store(false, Ordering::Release);
            entry.probe_passed.store(false, Ordering::Release);
            info!("[Registry] Provider '{}' deactivated", id);
        }
        Ok(())
    }

    /// Restore a persisted activation without probing again.
    pub(crate) fn restore_active(&self, id: &str) -> Result<()> {
        let entry = self.entry(id)?;
        entry.probe_passed.store(true, Ordering::Release);
        entry.active.store(true, Ordering::Release);
        Ok(())
    }
}
