use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum_extra::TypedHeader;
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use crate::WebState;

/// Live vehicle updates; new subscribers first get the latest payload.
pub async fn testmap_vehicles(
    TypedHeader(user_agent): TypedHeader<headers::UserAgent>,
    State(state): State<WebState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    log::info!("[sse] vehicles subscriber connected: {}", user_agent.as_str());
    let (snapshot, rx) = state.core.vehicles_broadcast.subscribe();

    let initial = stream::iter(
        snapshot
            .into_iter()
            .map(|frame| Ok(Event::default().data(frame.as_str()))),
    );
    let live = ReceiverStream::new(rx).map(|frame| Ok(Event::default().data(frame.as_str())));

    Sse::new(initial.chain(live)).keep_alive(KeepAlive::default())
}

/// Outbound-call telemetry; subscribers replay the bounded history before
/// entering live mode.
pub async fn api_calls(
    State(state): State<WebState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (history, rx) = state.core.api_log.subscribe();

    let replay: Vec<Result<Event, Infallible>> = history
        .iter()
        .filter_map(|call| serde_json::to_string(call).ok())
        .map(|json| Ok(Event::default().data(json)))
        .collect();
    let live = ReceiverStream::new(rx).map(|frame| Ok(Event::default().data(frame.as_str())));

    Sse::new(stream::iter(replay).chain(live)).keep_alive(KeepAlive::default())
}
