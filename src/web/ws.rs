//! WebSocket handler
//!
//! Same messages as the SSE stream, framed as `{"event": ..., "data": ...}`.
//! A `request_update` text frame asks for an immediate snapshot.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::AppState;

const REQUEST_UPDATE: &str = "request_update";

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = state.hub.subscribe().await;
    let id = subscription.id();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = subscription.recv() => {
                let Some(message) = outgoing else {
                    debug!("Subscriber {} dropped by hub, closing socket", id);
                    break;
                };
                let text = match serde_json::to_string(&*message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {} for subscriber {}: {}", message.event_name(), id, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) if text.trim() == REQUEST_UPDATE => {
                    if let Err(e) = state.hub.refresh(id).await {
                        debug!("Refresh for subscriber {} failed: {}", id, e);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
    // dropping the subscription unregisters it
}
