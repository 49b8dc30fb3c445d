//! Multi-provider sync orchestrator.
//!
//! Fans one logical sync out to every selected provider, waits for all of them
//! to settle and consolidates what succeeded. One provider failing never
//! aborts the others.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use super::mapping::{default_shape, map_entities};
use super::reporter::SyncReporter;
use crate::clock::Clock;
use crate::errors::{GatewayError, Result};
use crate::executor::{ExecuteOptions, RequestExecutor};
use crate::models::{EntitySet, Params, ProviderSyncOutcome, SyncError, SyncResult, SyncTotals};
use crate::registry::ProviderRegistry;

const UNKNOWN_CURRENCY: &str = "UNKNOWN";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Options for every provider call. No local retries by default, so the
    /// wait-for-all barrier is bounded by a single timeout.
    pub options: ExecuteOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            options: ExecuteOptions::default().without_cache().with_max_retries(0),
        }
    }
}

/// Latest consolidated data for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedView {
    pub subject_id: String,
    pub entities: EntitySet,
    pub totals: SyncTotals,
    /// When each provider's slice was last replaced.
    pub refreshed_at: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct SubjectState {
    slices: BTreeMap<String, EntitySet>,
    refreshed_at: BTreeMap<String, DateTime<Utc>>,
}

/// Marks a subject as syncing; released on drop, whatever the exit path.
struct SubjectLease<'a> {
    leases: &'a DashMap<String, usize>,
    subject_id: String,
}

impl Drop for SubjectLease<'_> {
    fn drop(&mut self) {
        self.leases
            .remove_if_mut(&self.subject_id, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
    }
}

struct ProviderRun {
    outcome: ProviderSyncOutcome,
    entities: Option<EntitySet>,
    error: Option<SyncError>,
}

/// Orchestrates subject syncs across providers.
///
/// The orchestrator is the only writer of consolidated state. Each sync
/// replaces the slice of every provider that succeeded and keeps the previous
/// slice of providers that failed, so repeating a sync never duplicates data.
pub struct SyncOrchestrator {
    registry: Arc<ProviderRegistry>,
    executor: Arc<RequestExecutor>,
    reporter: Arc<dyn SyncReporter>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    leases: DashMap<String, usize>,
    views: DashMap<String, SubjectState>,
}

impl SyncOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        executor: Arc<RequestExecutor>,
        reporter: Arc<dyn SyncReporter>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            reporter,
            clock,
            config,
            leases: DashMap::new(),
            views: DashMap::new(),
        }
    }

    fn acquire(&self, subject_id: &str, force: bool) -> Result<SubjectLease<'_>> {
        let mut count = self.leases.entry(subject_id.to_string()).or_insert(0);
        if *count > 0 && !force {
            return Err(GatewayError::SyncInProgress(subject_id.to_string()));
        }
        *count += 1;
        Ok(SubjectLease {
            leases: &self.leases,
            subject_id: subject_id.to_string(),
        })
    }

    pub fn is_syncing(&self, subject_id: &str) -> bool {
        self.leases.contains_key(subject_id)
    }

    /// Sync `subject_id` against `selection`, or every active provider that
    /// declares sync operations.
    ///
    /// A concurrent sync of the same subject fails with
    /// [`GatewayError::SyncInProgress`] unless `force` is set.
    pub async fn sync_all(
        &self,
        subject_id: &str,
        selection: Option<&[String]>,
        force: bool,
    ) -> Result<SyncResult> {
        let _lease = self.acquire(subject_id, force)?;

        let provider_ids: Vec<String> = match selection {
            Some(ids) => {
                let mut ids = ids.to_vec();
                ids.sort();
                ids.dedup();
                ids
            }
            None => self
                .registry
                .list_active()
                .into_iter()
                .filter(|p| p.supports_sync())
                .map(|p| p.id.clone())
                .collect(),
        };

        info!(
            "[Sync] Starting sync for subject '{}' across {} providers",
            subject_id,
            provider_ids.len()
        );
        self.reporter.report_sync_start(subject_id, &provider_ids);

        let started_at = self.clock.now();
        let started = Instant::now();

        let runs = join_all(
            provider_ids
                .iter()
                .map(|provider_id| self.sync_provider(subject_id, provider_id)),
        )
        .await;

        let mut providers = Vec::with_capacity(runs.len());
        let mut errors = Vec::new();
        let mut fresh = EntitySet::default();
        let mut replaced = Vec::new();

        for run in runs {
            self.reporter.report_provider(subject_id, &run.outcome);
            if let Some(entities) = run.entities {
                replaced.push((run.outcome.provider_id.clone(), entities.clone()));
                fresh.extend(entities);
            }
            if let Some(error) = run.error {
                errors.push(error);
            }
            providers.push(run.outcome);
        }

        self.replace_slices(subject_id, replaced);

        let success = providers.iter().any(|p| p.success);
        let totals = compute_totals(&fresh);
        let result = SyncResult {
            subject_id: subject_id.to_string(),
            success,
            providers,
            accounts: fresh.accounts,
            positions: fresh.positions,
            transactions: fresh.transactions,
            totals,
            errors,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if result.errors.is_empty() {
            info!(
                "[Sync] Subject '{}' synced: {} accounts, {} positions, {} transactions in {}ms",
                subject_id,
                result.totals.account_count,
                result.totals.position_count,
                result.totals.transaction_count,
                result.duration_ms
            );
        } else {
            warn!(
                "[Sync] Subject '{}' synced with {} provider error(s) in {}ms",
                subject_id,
                result.errors.len(),
                result.duration_ms
            );
        }
        self.reporter.report_sync_complete(&result);
        Ok(result)
    }

    async fn sync_provider(&self, subject_id: &str, provider_id: &str) -> ProviderRun {
        let started = Instant::now();
        let outcome = self.fetch_provider(subject_id, provider_id).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(entities) => {
                debug!(
                    "[Sync] '{}' returned {} entities for '{}'",
                    provider_id,
                    entities.len(),
                    subject_id
                );
                ProviderRun {
                    outcome: ProviderSyncOutcome {
                        provider_id: provider_id.to_string(),
                        success: true,
                        accounts: entities.accounts.len(),
                        positions: entities.positions.len(),
                        transactions: entities.transactions.len(),
                        duration_ms,
                        error: None,
                    },
                    entities: Some(entities),
                    error: None,
                }
            }
            Err((operation, err)) => {
                warn!("[Sync] '{}' failed for '{}': {}", provider_id, subject_id, err);
                ProviderRun {
                    outcome: ProviderSyncOutcome {
                        provider_id: provider_id.to_string(),
                        success: false,
                        accounts: 0,
                        positions: 0,
                        transactions: 0,
                        duration_ms,
                        error: Some(err.to_string()),
                    },
                    entities: None,
                    error: Some(SyncError {
                        provider_id: provider_id.to_string(),
                        operation,
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    }),
                }
            }
        }
    }

    /// Runs every sync operation of one provider. All-or-nothing: the first
    /// failing operation fails the provider.
    async fn fetch_provider(
        &self,
        subject_id: &str,
        provider_id: &str,
    ) -> std::result::Result<EntitySet, (Option<String>, GatewayError)> {
        let config = self.registry.get(provider_id).map_err(|e| (None, e))?;
        if !config.supports_sync() {
            return Err((
                None,
                GatewayError::Config(format!("Provider {} declares no sync operations", provider_id)),
            ));
        }

        let mut params = Params::new();
        params.insert("subjectId".to_string(), json!(subject_id));

        let mut entities = EntitySet::default();
        for operation in &config.sync_operations {
            let fail = |e: GatewayError| (Some(operation.clone()), e);
            let shape = config
                .operation(operation)
                .and_then(|t| t.shape.clone())
                .or_else(|| default_shape(operation))
                .ok_or_else(|| {
                    fail(GatewayError::Config(format!(
                        "Operation {}.{} has no response shape",
                        provider_id, operation
                    )))
                })?;
            let body = self
                .executor
                .execute(provider_id, operation, &params, &self.config.options)
                .await
                .map_err(fail)?;
            entities.extend(map_entities(provider_id, &shape, &body).map_err(fail)?);
        }
        Ok(dedup(entities))
    }

    fn replace_slices(&self, subject_id: &str, replaced: Vec<(String, EntitySet)>) {
        if replaced.is_empty() {
            return;
        }
        let now = self.clock.now();
        let mut state = self.views.entry(subject_id.to_string()).or_default();
        for (provider_id, entities) in replaced {
            state.refreshed_at.insert(provider_id.clone(), now);
            state.slices.insert(provider_id, entities);
        }
    }

    /// Consolidated data for a subject across every provider slice held.
    pub fn consolidated(&self, subject_id: &str) -> Option<ConsolidatedView> {
        let state = self.views.get(subject_id)?;
        let mut entities = EntitySet::default();
        for slice in state.slices.values() {
            entities.extend(slice.clone());
        }
        Some(ConsolidatedView {
            subject_id: subject_id.to_string(),
            totals: compute_totals(&entities),
            entities,
            refreshed_at: state.refreshed_at.clone(),
        })
    }
}

/// Deduplicate by provider-qualified id, keeping the last occurrence.
fn dedup(set: EntitySet) -> EntitySet {
    fn by_id<T>(items: Vec<T>, id: impl Fn(&T) -> &str) -> Vec<T> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut out: Vec<T> = Vec::with_capacity(items.len());
        for item in items {
            match index.get(id(&item)) {
                Some(&i) => out[i] = item,
                None => {
                    index.insert(id(&item).to_string(), out.len());
                    out.push(item);
                }
            }
        }
        out
    }

    EntitySet {
        accounts: by_id(set.accounts, |a| &a.id),
        positions: by_id(set.positions, |p| &p.id),
        transactions: by_id(set.transactions, |t| &t.id),
    }
}

pub fn compute_totals(set: &EntitySet) -> SyncTotals {
    let mut balances: BTreeMap<String, Decimal> = BTreeMap::new();
    for account in &set.accounts {
        let currency = account.currency.as_deref().unwrap_or(UNKNOWN_CURRENCY);
        *balances.entry(currency.to_string()).or_default() += account.balance;
    }
    let mut market_values: BTreeMap<String, Decimal> = BTreeMap::new();
    for position in &set.positions {
        let currency = position.currency.as_deref().unwrap_or(UNKNOWN_CURRENCY);
        *market_values.entry(currency.to_string()).or_default() += position.market_value;
    }
    SyncTotals {
        account_count: set.accounts.len(),
        position_count: set.positions.len(),
        transaction_count: set.transactions.len(),
        balances_by_currency: balances,
        market_value_by_currency: market_values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use rust_decimal_macros::dec;

    fn account(id: &str, balance: Decimal, currency: Option<&str>) -> Account {
        Account {
            id: format!("p:{}", id),
            provider_id: "p".to_string(),
            external_id: id.to_string(),
            name: None,
            balance,
            currency: currency.map(str::to_string),
        }
    }

    #[test]
    fn test_dedup_keeps_last() {
        let set = EntitySet {
            accounts: vec![
                account("a", dec!(1), Some("EUR")),
                account("b", dec!(2), Some("EUR")),
                account("a", dec!(5), Some("EUR")),
            ],
            ..EntitySet::default()
        };
        let set = dedup(set);
        assert_eq!(set.accounts.len(), 2);
        assert_eq!(set.accounts[0].balance, dec!(5));
    }

    #[test]
    fn test_totals_group_by_currency() {
        let set = EntitySet {
            accounts: vec![
                account("a", dec!(100.50), Some("EUR")),
                account("b", dec!(20), Some("EUR")),
                account("c", dec!(7), None),
            ],
            ..EntitySet::default()
        };
        let totals = compute_totals(&set);
        assert_eq!(totals.account_count, 3);
        assert_eq!(totals.balances_by_currency["EUR"], dec!(120.50));
        assert_eq!(totals.balances_by_currency["UNKNOWN"], dec!(7));
    }

    #[test]
    fn test_lease_released_on_drop() {
        let leases = DashMap::new();
        {
            let _a = SubjectLease {
                leases: &leases,
                subject_id: "s".to_string(),
            };
            leases.insert("s".to_string(), 1);
        }
        assert!(!leases.contains_key("s"));
    }
}
