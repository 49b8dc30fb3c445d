use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use advisor_gateway::GatewayError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::UnknownProvider(_) | GatewayError::UnknownOperation { .. } => {
            StatusCode::NOT_FOUND
        }
        GatewayError::ProviderInactive(_) | GatewayError::SyncInProgress(_) => StatusCode::CONFLICT,
        GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::Auth { .. } => StatusCode::UNAUTHORIZED,
        GatewayError::Upstream { .. } | GatewayError::Transport { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Activation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Config(_) | GatewayError::Serialization(_) => StatusCode::BAD_REQUEST,
        GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Gateway(e) => (gateway_status(e), e.kind()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }
        let body = Json(json!({ "code": code, "message": self.to_string() }));
        (status, body).into_response()
    }
}
