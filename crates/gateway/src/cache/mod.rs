//! Short-TTL response cache for idempotent provider calls.
//!
//! Entries self-expire: a read past the expiry evicts the entry and reports a
//! miss, and [`ResponseCache::sweep`] removes whatever nobody read again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::debug;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::models::Params;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// Computes the cache key for a logical request.
///
/// The key is `<provider>:<operation>:<sha256>` where the hash covers the
/// canonical JSON encoding of the parameters. [`Params`] is ordered, so two
/// requests with the same parameters in a different insertion order produce
/// the same key.
pub fn cache_key(provider_id: &str, operation: &str, params: &Params) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_id.as_bytes());
    hasher.update(b"|");
    hasher.update(operation.as_bytes());
    hasher.update(b"|");
    // Hash the JSON object encoding: names are escaped like values, and
    // serde_json objects are BTreeMap-backed, so nested maps encode sorted too
    hasher.update(b"{");
    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(Value::from(name.as_str()).to_string().as_bytes());
        hasher.update(b":");
        hasher.update(value.to_string().as_bytes());
    }
    hasher.update(b"}");
    format!("{}:{}:{}", provider_id, operation, hex::encode(hasher.finalize()))
}

pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Cached value for `key`, or `None` on a miss or an expired entry.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let hit = self.entries.get(key).map(|entry| {
            if now < entry.expires_at {
                Some(entry.value.clone())
            } else {
                None
            }
        })?;
        if hit.is_none() {
            // Re-check under the write lock; a concurrent set may have refreshed it
            self.entries.remove_if(key, |_, entry| now >= entry.expires_at);
            debug!("[Cache] Expired entry evicted: {}", key);
        }
        hit
    }

    /// Store `value` for `ttl_minutes`. A zero TTL stores nothing.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl_minutes: u32) {
        if ttl_minutes == 0 {
            return;
        }
        let expires_at = self.clock.now() + Duration::minutes(i64::from(ttl_minutes));
        self.entries
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    pub fn invalidate_provider(&self, provider_id: &str) {
        let prefix = format!("{}:", provider_id);
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("[Cache] Swept {} expired entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
