//! Provider management and direct operation execution.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::ApiResult;
use crate::main_lib::AppState;
use advisor_gateway::{
    ConnectionTest, Credentials, ExecuteOptions, Params, ProviderConfig, ProviderStatus,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExecuteRequest {
    params: Params,
    options: Option<ExecuteOptions>,
}

async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderStatus>> {
    Json(state.gateway.list_providers().await)
}

async fn register_provider(
    State(state): State<Arc<AppState>>,
    Json(provider): Json<ProviderConfig>,
) -> ApiResult<StatusCode> {
    info!("Registering provider '{}'", provider.id);
    state.gateway.register_provider(provider)?;
    Ok(StatusCode::CREATED)
}

async fn get_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProviderConfig>> {
    let provider = state.gateway.provider(&id)?;
    Ok(Json(provider.as_ref().clone()))
}

async fn activate_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<StatusCode> {
    state.gateway.activate(&id, credentials).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deactivate_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.gateway.deactivate(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConnectionTest>> {
    Ok(Json(state.gateway.test_connection(&id).await?))
}

async fn execute_operation(
    State(state): State<Arc<AppState>>,
    Path((id, operation)): Path<(String, String)>,
    body: Option<Json<ExecuteRequest>>,
) -> ApiResult<Json<Value>> {
    let request = body.map(|Json(inner)| inner).unwrap_or_default();
    let value = state
        .gateway
        .execute(&id, &operation, &request.params, request.options)
        .await?;
    Ok(Json(value))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/providers", get(list_providers).post(register_provider))
        .route("/providers/{id}", get(get_provider))
        .route("/providers/{id}/activate", post(activate_provider))
        .route("/providers/{id}/deactivate", post(deactivate_provider))
        .route("/providers/{id}/test", post(test_connection))
        .route(
            "/providers/{id}/operations/{operation}",
            post(execute_operation),
        )
}
