//! HTTP query routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::AppState;
use crate::hub::{HubError, HubState, LiveState, SubscriberId};
use crate::stats::AggregateStats;
use crate::store::LiveEvents;

/// Service description
pub async fn index(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = match state.hub.state() {
        HubState::Idle => "idle",
        HubState::Active => "active",
    };
    Json(json!({
        "message": "Live DDoS Map API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": status,
        "subscribers": state.hub.subscriber_count(),
        "endpoints": {
            "/api/attacks": "Get current active attacks",
            "/api/stats": "Get attack statistics",
            "/api/snapshot": "Get live attacks and statistics from the same instant",
            "/api/subscribers/:id/refresh": "Push a fresh snapshot to a subscriber",
            "/events": "Server-Sent Events stream for real-time updates",
            "/ws": "WebSocket connection for real-time updates"
        }
    }))
}

#[derive(Debug, Serialize)]
pub struct AttacksResponse {
    pub success: bool,
    pub count: usize,
    pub attacks: LiveEvents,
}

/// API: Current live attacks
pub async fn api_attacks(State(state): State<Arc<AppState>>) -> Json<AttacksResponse> {
    let attacks = state.hub.live_events();
    Json(AttacksResponse {
        success: true,
        count: attacks.len(),
        attacks,
    })
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: Arc<AggregateStats>,
}

/// API: Cumulative statistics
pub async fn api_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        success: true,
        stats: state.hub.stats(),
    })
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub success: bool,
    pub count: usize,
    #[serde(flatten)]
    pub state: LiveState,
}

/// API: Live attacks and stats taken between two ticks
pub async fn api_snapshot(State(state): State<Arc<AppState>>) -> Json<SnapshotResponse> {
    let state = state.hub.current_state().await;
    Json(SnapshotResponse {
        success: true,
        count: state.live_events.len(),
        state,
    })
}

/// API: Ask the hub to push a snapshot to a connected subscriber
pub async fn api_refresh(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SubscriberId>,
) -> StatusCode {
    match state.hub.refresh(id).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(HubError::UnknownSubscriber(_)) => StatusCode::NOT_FOUND,
        Err(HubError::Delivery(_)) => StatusCode::GONE,
    }
}
