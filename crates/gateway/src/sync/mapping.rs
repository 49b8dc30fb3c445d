//! Maps provider payloads onto canonical entities.
//!
//! Providers share no response schema. Each endpoint declares a
//! [`ResponseShape`]; endpoints without one fall back to a shape inferred from
//! the operation name with identity field pointers.

use std::collections::BTreeMap;
use std::str::FromStr;

use log::warn;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::errors::{GatewayError, Result};
use crate::models::{Account, EntityKind, EntitySet, Position, ResponseShape, Transaction};

/// Shape assumed for an operation that declares none.
pub fn default_shape(operation: &str) -> Option<ResponseShape> {
    let entity = match operation {
        "accounts" | "balances" => EntityKind::Account,
        "positions" | "holdings" => EntityKind::Position,
        "transactions" => EntityKind::Transaction,
        _ => return None,
    };
    Some(ResponseShape {
        entity,
        items: String::new(),
        fields: BTreeMap::new(),
    })
}

/// Provider-qualified id: `<provider>:<external id>`.
pub fn qualified_id(provider_id: &str, external_id: &str) -> String {
    format!("{}:{}", provider_id, external_id)
}

struct Item<'a> {
    value: &'a Value,
    shape: &'a ResponseShape,
}

impl<'a> Item<'a> {
    fn field(&self, name: &str) -> Option<&'a Value> {
        self.value
            .pointer(&self.shape.field_pointer(name))
            .filter(|v| !v.is_null())
    }

    fn text(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn decimal(&self, name: &str) -> Result<Decimal> {
        let Some(value) = self.field(name) else {
            return Ok(Decimal::ZERO);
        };
        let raw = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            other => {
                return Err(GatewayError::Serialization(format!(
                    "field '{}' is not numeric: {}",
                    name, other
                )))
            }
        };
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(|e| {
                GatewayError::Serialization(format!("field '{}' = '{}': {}", name, raw, e))
            })
    }
}

/// Turn one response body into entities for `provider_id`.
///
/// Items without an id are skipped. A malformed numeric field fails the
/// whole payload so a provider slice is never half-mapped.
pub fn map_entities(provider_id: &str, shape: &ResponseShape, body: &Value) -> Result<EntitySet> {
    let root = if shape.items.is_empty() {
        Some(body)
    } else {
        body.pointer(&shape.items)
    };
    let items: Vec<&Value> = match root {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(GatewayError::Serialization(format!(
                "expected an array of items from {}, got {}",
                provider_id, other
            )))
        }
    };

    let mut set = EntitySet::default();
    for value in items {
        let item = Item { value, shape };
        let Some(external_id) = item.text("id") else {
            warn!("[Sync] Skipping {} item without id from '{}'", kind_name(shape.entity), provider_id);
            continue;
        };
        let id = qualified_id(provider_id, &external_id);
        let account_id = item
            .text("accountId")
            .map(|account| qualified_id(provider_id, &account));

        match shape.entity {
            EntityKind::Account => set.accounts.push(Account {
                id,
                provider_id: provider_id.to_string(),
                external_id,
                name: item.text("name"),
                balance: item.decimal("balance")?,
                currency: item.text("currency"),
            }),
            EntityKind::Position => set.positions.push(Position {
                id,
                provider_id: provider_id.to_string(),
                external_id,
                account_id,
                symbol: item.text("symbol"),
                quantity: item.decimal("quantity")?,
                market_value: item.decimal("marketValue")?,
                currency: item.text("currency"),
            }),
            EntityKind::Transaction => set.transactions.push(Transaction {
                id,
                provider_id: provider_id.to_string(),
                external_id,
                account_id,
                amount: item.decimal("amount")?,
                currency: item.text("currency"),
                booked_at: item.text("bookedAt"),
                description: item.text("description"),
            }),
        }
    }
    Ok(set)
}

fn kind_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Account => "account",
        EntityKind::Position => "position",
        EntityKind::Transaction => "transaction",
    }
}
