//! Canonical entities and the outcome of an orchestrated sync.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of canonical entity an endpoint yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Position,
    Transaction,
}

/// A bank, brokerage or custody account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Provider-qualified id: `<provider>:<external id>`.
    pub id: String,
    pub provider_id: String,
    pub external_id: String,
    pub name: Option<String>,
    pub balance: Decimal,
    pub currency: Option<String>,
}

/// A holding inside an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    pub provider_id: String,
    pub external_id: String,
    pub account_id: Option<String>,
    pub symbol: Option<String>,
    pub quantity: Decimal,
    pub market_value: Decimal,
    pub currency: Option<String>,
}

/// A booked cash movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub provider_id: String,
    pub external_id: String,
    pub account_id: Option<String>,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub booked_at: Option<String>,
    pub description: Option<String>,
}

/// Entities produced by one provider during a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySet {
    pub accounts: Vec<Account>,
    pub positions: Vec<Position>,
    pub transactions: Vec<Transaction>,
}

impl EntitySet {
    pub fn extend(&mut self, other: EntitySet) {
        self.accounts.extend(other.accounts);
        self.positions.extend(other.positions);
        self.transactions.extend(other.transactions);
    }

    pub fn len(&self) -> usize {
        self.accounts.len() + self.positions.len() + self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Aggregates over successful providers only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTotals {
    pub account_count: usize,
    pub position_count: usize,
    pub transaction_count: usize,
    /// Sum of account balances per currency (`"UNKNOWN"` when unspecified).
    pub balances_by_currency: BTreeMap<String, Decimal>,
    /// Sum of position market values per currency.
    pub market_value_by_currency: BTreeMap<String, Decimal>,
}

/// Per-provider error collected during a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub kind: String,
    pub message: String,
}

/// Status of one provider within a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSyncOutcome {
    pub provider_id: String,
    pub success: bool,
    pub accounts: usize,
    pub positions: usize,
    pub transactions: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one orchestrated multi-provider sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub subject_id: String,
    /// True when at least one provider succeeded.
    pub success: bool,
    pub providers: Vec<ProviderSyncOutcome>,
    pub accounts: Vec<Account>,
    pub positions: Vec<Position>,
    pub transactions: Vec<Transaction>,
    pub totals: SyncTotals,
    pub errors: Vec<SyncError>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}
