//! pageviews - a static site server with built-in request analytics
//!
//! Serves `server.site_dir`, records every request per day and visitor,
//! snapshots the counts to compressed day files and exposes a dashboard at
//! `analytics.dashboard_path`.

use anyhow::Result;
use pageviews::{config, web, Analytics};
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

    info!("Starting pageviews...");
    info!("Configuration loaded");

    let analytics = Arc::new(Analytics::new(config.analytics.clone())?);
    info!(
        "Recording to {} (prefix '{}', flush every {}s)",
        config.analytics.directory.display(),
        config.analytics.name,
        config.analytics.flush_interval_seconds
    );

    let scheduler = analytics.start_scheduler();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    };

    // Start web server (blocking until shutdown)
    let served = web::start_server(&config.server, analytics, shutdown).await;

    // Persist whatever arrived since the last tick
    scheduler.stop().await;

    served
}
