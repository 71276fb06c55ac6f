//! Server-Sent Events for scan and download progress

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use romhoard_common::sse::create_event_sse_stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams every `RomhoardEvent`: scan started/progress/completed/failed/
/// cancelled, identification results, download progress and merges.
pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    create_event_sse_stream(&state.event_bus, "romhoard")
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
