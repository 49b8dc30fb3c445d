//! Multi-provider sync endpoints and the SSE progress reporter.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::events::{EventBus, ServerEvent, SYNC_COMPLETE, SYNC_ERROR, SYNC_PROVIDER, SYNC_START};
use crate::main_lib::AppState;
use advisor_gateway::{ConsolidatedView, ProviderSyncOutcome, SyncReporter, SyncResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    subject_id: String,
    #[serde(default)]
    providers: Option<Vec<String>>,
    #[serde(default)]
    force: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// EventBus Sync Reporter
// ─────────────────────────────────────────────────────────────────────────────

/// Sync reporter that publishes progress to the EventBus for SSE delivery.
pub struct EventBusSyncReporter {
    event_bus: EventBus,
}

impl EventBusSyncReporter {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl SyncReporter for EventBusSyncReporter {
    fn report_sync_start(&self, subject_id: &str, providers: &[String]) {
        self.event_bus.publish(ServerEvent::with_payload(
            SYNC_START,
            serde_json::json!({ "subjectId": subject_id, "providers": providers }),
        ));
    }

    fn report_provider(&self, subject_id: &str, outcome: &ProviderSyncOutcome) {
        self.event_bus.publish(ServerEvent::with_payload(
            SYNC_PROVIDER,
            serde_json::json!({ "subjectId": subject_id, "outcome": outcome }),
        ));
    }

    fn report_sync_complete(&self, result: &SyncResult) {
        if result.success {
            self.event_bus.publish(ServerEvent::with_payload(
                SYNC_COMPLETE,
                serde_json::to_value(result).unwrap_or_default(),
            ));
        } else {
            self.event_bus.publish(ServerEvent::with_payload(
                SYNC_ERROR,
                serde_json::json!({ "subjectId": result.subject_id, "errors": result.errors }),
            ));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn sync_all(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SyncRequest>,
) -> ApiResult<Json<SyncResult>> {
    info!("Sync requested for subject '{}'", body.subject_id);
    let result = state
        .gateway
        .sync_all(&body.subject_id, body.providers.as_deref(), body.force)
        .await?;
    Ok(Json(result))
}

async fn get_consolidated(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> ApiResult<Json<ConsolidatedView>> {
    state
        .gateway
        .consolidated(&subject_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No synced data for subject {}", subject_id)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync", post(sync_all))
        .route("/sync/{subject_id}", get(get_consolidated))
}
