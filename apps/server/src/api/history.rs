use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::main_lib::AppState;
use advisor_gateway::{AuditQuery, ProviderHealth, RequestRecord, RequestStatus};

const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    provider_id: Option<String>,
    operation: Option<String>,
    status: Option<RequestStatus>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<RequestRecord>> {
    let query = AuditQuery {
        provider_id: q.provider_id,
        operation: q.operation,
        status: q.status,
        since: q.since,
        until: q.until,
    };
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.gateway.query_history(&query, limit))
}

async fn get_health(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderHealth>> {
    Json(state.gateway.get_health())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/history", get(get_history))
        .route("/health", get(get_health))
}
