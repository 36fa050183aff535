//! Attackmap - live DDoS attack map backend
//!
//! Generates synthetic attack events on a fixed cadence and streams them to
//! dashboards:
//! - Weighted attack types, intensities and target pools
//! - GeoIP via MaxMind database or ipinfo, random fallback
//! - Five-minute live window plus cumulative statistics
//! - SSE and WebSocket push with snapshot-on-join

mod config;
mod events;
mod geoip;
mod hub;
mod stats;
mod store;
mod synthesizer;
mod web;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = config::Config::load()?;

    // Initialize logging based on LOG_FORMAT env var
    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    info!("Starting attack map backend...");

    // Initialize geolocation (database and lookup service are both optional)
    let geo = Arc::new(geoip::GeoResolver::from_config(&config.geo));
    info!("Geolocation sources: {}", geo.source_count());

    let synthesizer = synthesizer::Synthesizer::new(geo, &config.generation)?;
    let hub = Arc::new(hub::BroadcastHub::new(
        Arc::new(synthesizer),
        config.generation.horizon(),
        config.hub.subscriber_buffer,
    ));

    // Start generation in background
    let generator = hub.start(config.generation.interval());

    // Start web server (blocking until Ctrl-C)
    web::start_server(&config, hub, shutdown_signal()).await?;

    generator.abort();
    info!("Shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
