use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::main_lib::AppState;

mod events;
mod history;
mod providers;
pub mod sync;
mod webhooks;

pub fn app_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(providers::router())
        .merge(sync::router())
        .merge(history::router())
        .merge(webhooks::router())
        .merge(events::router());

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
