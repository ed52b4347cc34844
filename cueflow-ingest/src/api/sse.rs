//! Server-Sent Events stream of ingest/playout events

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events - mirrors the in-process event bus to SSE clients
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    cueflow_common::sse::create_event_sse_stream("cueflow-ingest", state.events.subscribe())
}
