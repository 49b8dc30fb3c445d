use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::debug;

use crate::error::ApiResult;
use crate::main_lib::AppState;
use advisor_gateway::{DeadLetter, WebhookEvent};

/// Accept a provider notification. Processing happens on the gateway's queue.
async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Json(event): Json<WebhookEvent>,
) -> ApiResult<StatusCode> {
    debug!("Webhook {:?} for '{}' accepted", event.event_type, event.provider);
    state.gateway.on_webhook(event)?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_dead_letters(State(state): State<Arc<AppState>>) -> Json<Vec<DeadLetter>> {
    Json(state.gateway.dead_letters())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks", post(receive_webhook))
        .route("/webhooks/dead-letters", get(get_dead_letters))
}
