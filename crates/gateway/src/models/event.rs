//! Asynchronous push notifications from providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    NewTransaction,
    BalanceChange,
    ConnectionError,
    Maintenance,
}

impl WebhookEventType {
    /// Events that invalidate consolidated data and call for a resync.
    pub fn triggers_resync(&self) -> bool {
        matches!(
            self,
            WebhookEventType::NewTransaction | WebhookEventType::BalanceChange
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

/// An event that exhausted its processing attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub event: WebhookEvent,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserializes_with_type_tag() {
        let raw = r#"{
            "type": "new_transaction",
            "provider": "demo-bank",
            "subjectId": "client-42",
            "timestamp": "2024-03-01T10:00:00Z",
            "payload": { "transactionId": "t-1" }
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, WebhookEventType::NewTransaction);
        assert_eq!(event.subject_id.as_deref(), Some("client-42"));
        assert!(event.event_type.triggers_resync());
        assert!(!WebhookEventType::Maintenance.triggers_resync());
    }
}
