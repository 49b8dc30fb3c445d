use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_core::stream::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::events::ServerEvent;
use crate::main_lib::AppState;

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    /// Only forward events whose name starts with this prefix, e.g. `sync:`.
    prefix: Option<String>,
}

fn to_sse(event: ServerEvent) -> Option<SseEvent> {
    let frame = SseEvent::default().event(event.name);
    match event.payload {
        None => Some(frame.data("null")),
        Some(payload) => frame
            .json_data(payload)
            .map_err(|err| tracing::error!("Dropping SSE event {}: {}", event.name, err))
            .ok(),
    }
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let prefix = query.prefix.unwrap_or_default();
    let receiver = BroadcastStream::new(state.event_bus.subscribe());
    let stream = tokio_stream::StreamExt::filter_map(receiver, move |received| match received {
        Ok(event) if event.name.starts_with(prefix.as_str()) => to_sse(event).map(Ok),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("SSE subscriber lagged, {} events skipped", skipped);
            None
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events/stream", get(stream_events))
}
