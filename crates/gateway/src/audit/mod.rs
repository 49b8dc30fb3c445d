//! Append-only audit trail of provider calls.
//!
//! Every network attempt, cache hit and rate-limit refusal produces exactly one
//! [`RequestRecord`]. Records are immutable once appended; the only mutation
//! is pruning the oldest entries once the retention cap is exceeded.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::{RequestRecord, RequestStatus};

pub const DEFAULT_RETENTION: usize = 10_000;

/// Filters for [`AuditLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub provider_id: Option<String>,
    pub operation: Option<String>,
    pub status: Option<RequestStatus>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
}

impl AuditQuery {
    pub fn for_provider(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: Some(provider_id.into()),
            ..Self::default()
        }
    }

    fn matches(&self, record: &RequestRecord) -> bool {
        self.provider_id
            .as_deref()
            .map_or(true, |p| record.provider_id == p)
            && self
                .operation
                .as_deref()
                .map_or(true, |op| record.operation == op)
            && self.status.map_or(true, |s| record.status == s)
            && self.since.map_or(true, |t| record.timestamp >= t)
            && self.until.map_or(true, |t| record.timestamp < t)
    }
}

#[derive(Debug)]
pub struct AuditLog {
    records: Mutex<VecDeque<RequestRecord>>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RequestRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| {
            warn!("Audit log lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn record(&self, record: RequestRecord) {
        let mut records = self.lock();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Matching records, newest first, at most `limit` of them.
    pub fn query(&self, filter: &AuditQuery, limit: usize) -> Vec<RequestRecord> {
        self.lock()
            .iter()
            .rev()
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(n: i64, provider: &str, status: RequestStatus) -> RequestRecord {
        RequestRecord {
            id: format!("req-{}", n),
            provider_id: provider.to_string(),
            operation: "accounts".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(n),
            status,
            latency_ms: 10,
            retry_count: 0,
            cached: false,
            status_code: None,
            error: None,
        }
    }

    #[test]
    fn test_query_is_newest_first() {
        let log = AuditLog::new(100);
        for n in 0..5 {
            log.record(record(n, "demo-bank", RequestStatus::Success));
        }
        let ids: Vec<_> = log
            .query(&AuditQuery::default(), 3)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["req-4", "req-3", "req-2"]);
    }

    #[test]
    fn test_retention_drops_oldest() {
        let log = AuditLog::new(3);
        for n in 0..5 {
            log.record(record(n, "demo-bank", RequestStatus::Success));
        }
        assert_eq!(log.len(), 3);
        let all = log.query(&AuditQuery::default(), 10);
        assert_eq!(all.last().unwrap().id, "req-2");
    }

    #[test]
    fn test_filters() {
        let log = AuditLog::default();
        log.record(record(0, "demo-bank", RequestStatus::Success));
        log.record(record(1, "quotes", RequestStatus::Error));
        log.record(record(2, "demo-bank", RequestStatus::Timeout));

        let bank = log.query(&AuditQuery::for_provider("demo-bank"), 10);
        assert_eq!(bank.len(), 2);

        let errors = log.query(
            &AuditQuery {
                status: Some(RequestStatus::Error),
                ..AuditQuery::default()
            },
            10,
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].provider_id, "quotes");

        let window = log.query(
            &AuditQuery {
                since: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 1).unwrap()),
                until: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 2).unwrap()),
                ..AuditQuery::default()
            },
            10,
        );
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, "req-1");
    }
}
