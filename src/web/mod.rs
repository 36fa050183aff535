//! Web server module
//!
//! Thin HTTP surface over the broadcast hub: JSON queries, an SSE stream
//! and a WebSocket stream for the dashboard.

mod routes;
mod sse;
mod ws;

use anyhow::{Context, Result};
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::{future::Future, sync::Arc};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Config;
use crate::hub::BroadcastHub;

pub struct AppState {
    pub hub: Arc<BroadcastHub>,
}

pub fn router(state: Arc<AppState>, cors_origin: &str) -> Result<Router> {
    let origin = HeaderValue::from_str(cors_origin)
        .with_context(|| format!("Invalid CORS origin '{}'", cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST]);

    let app = Router::new()
        .route("/", get(routes::index))
        // Query endpoints
        .route("/api/attacks", get(routes::api_attacks))
        .route("/api/stats", get(routes::api_stats))
        .route("/api/snapshot", get(routes::api_snapshot))
        .route("/api/subscribers/:id/refresh", post(routes::api_refresh))
        // Push endpoints
        .route("/events", get(sse::events_handler))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state);

    Ok(app)
}

pub async fn start_server<F>(config: &Config, hub: Arc<BroadcastHub>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(AppState { hub });
    let app = router(state, &config.server.cors_origin)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Live attack map API running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{fixtures::event, AttackEvent};
    use crate::hub::BatchSource;
    use crate::synthesizer::SynthesisError;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    struct TwoEvents;

    #[async_trait]
    impl BatchSource for TwoEvents {
        async fn next_batch(&self) -> Result<Vec<AttackEvent>, SynthesisError> {
            let now = chrono::Utc::now();
            Ok(vec![event("a", "US", now), event("b", "DE", now)])
        }
    }

    async fn app() -> (Arc<BroadcastHub>, Router) {
        let hub = Arc::new(BroadcastHub::new(Arc::new(TwoEvents), chrono::Duration::minutes(5), 8));
        hub.on_tick().await.unwrap();
        let state = Arc::new(AppState { hub: hub.clone() });
        (hub, router(state, "http://localhost:8888").unwrap())
    }

    async fn get_json(app: Router, uri: &str) -> Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn refresh_request(id: u64) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/subscribers/{}/refresh", id))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn attacks_endpoint_lists_live_events() {
        let (_hub, app) = app().await;
        let json = get_json(app, "/api/attacks").await;
        assert_eq!(json["success"], true);
        assert_eq!(json["count"], 2);
        assert_eq!(json["attacks"][0]["sourceIP"], "45.95.169.7");
    }

    #[tokio::test]
    async fn stats_endpoint_reports_totals() {
        let (_hub, app) = app().await;
        let json = get_json(app, "/api/stats").await;
        assert_eq!(json["stats"]["totalAttacks"], 2);
        assert_eq!(json["stats"]["mostTargetedCountries"]["DE"], 1);
    }

    #[tokio::test]
    async fn snapshot_endpoint_pairs_events_with_stats() {
        let (hub, app) = app().await;
        hub.on_tick().await.unwrap();

        let json = get_json(app, "/api/snapshot").await;
        assert_eq!(json["success"], true);
        assert_eq!(json["count"], 4);
        assert_eq!(json["attacks"].as_array().unwrap().len(), 4);
        assert_eq!(json["stats"]["totalAttacks"], 4);
    }

    #[tokio::test]
    async fn refresh_endpoint() {
        let (hub, app) = app().await;

        let response = app.clone().oneshot(refresh_request(99)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut sub = hub.subscribe().await;
        sub.recv().await.unwrap();
        let response = app.oneshot(refresh_request(sub.id())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(sub.recv().await.unwrap().event_name(), "snapshot");
    }

    #[tokio::test]
    async fn index_reports_hub_status() {
        let (hub, app) = app().await;
        let json = get_json(app.clone(), "/").await;
        assert_eq!(json["status"], "idle");

        let _sub = hub.subscribe().await;
        let json = get_json(app, "/").await;
        assert_eq!(json["status"], "active");
        assert_eq!(json["subscribers"], 1);
    }

    #[tokio::test]
    async fn rejects_invalid_cors_origin() {
        let (hub, _app) = app().await;
        assert!(router(Arc::new(AppState { hub }), "bad\norigin").is_err());
    }
}
