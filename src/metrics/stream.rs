use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};

use super::collector::{LiveSnapshot, LiveStats};

const PUSH_EVERY: Duration = Duration::from_millis(500);

/// `GET /api/metrics`: the current snapshot.
pub async fn get_metrics(State(stats): State<Arc<LiveStats>>) -> Json<LiveSnapshot> {
    Json(stats.snapshot())
}

/// `GET /api/metrics/stream`: a `snapshot` event every 500 ms, numbered
/// from 0 so a client can spot dropped events.
pub async fn metrics_stream(
    State(stats): State<Arc<LiveStats>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ticks = IntervalStream::new(tokio::time::interval(PUSH_EVERY));
    let mut next_id = 0u64;
    let events = ticks.map(move |_| {
        let body = serde_json::to_string(&stats.snapshot()).unwrap_or_default();
        let id = next_id;
        next_id += 1;
        Ok(Event::default()
            .event("snapshot")
            .id(id.to_string())
            .data(body))
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
