//! Server-Sent Events (SSE) handler

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio_stream::StreamExt;

use super::AppState;

/// Subscribe to the hub. The first event names the subscriber id so the
/// client can ask for refreshes; the join snapshot and deltas follow.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe().await;
    let greeting = Event::default()
        .event("subscribed")
        .data(subscription.id().to_string());

    let updates = subscription.filter_map(|message| {
        let json = message.data_json().ok()?;
        Some(Ok(Event::default().data(json).event(message.event_name())))
    });

    Sse::new(tokio_stream::once(Ok(greeting)).chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
