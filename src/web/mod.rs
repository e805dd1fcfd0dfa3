//! Web server module

mod middleware;
mod render;
mod routes;

pub use middleware::{RequestTrackingLayer, RequestTrackingMiddleware};
pub use render::render_dashboard;

use anyhow::Result;
use axum::{
    handler::HandlerWithoutStateExt,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::Analytics;

/// Dashboard routes (`{dashboard_path}` and `{dashboard_path}/report.json`).
///
/// Merge into an application router and wrap the application with
/// [`RequestTrackingLayer`] to record its traffic.
pub fn dashboard_router(analytics: Arc<Analytics>) -> Router {
    let base = analytics.config().dashboard_path.trim_end_matches('/').to_string();

    Router::new()
        .route(&base, get(routes::dashboard_page))
        .route(&format!("{}/report.json", base), get(routes::dashboard_json))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(analytics)
}

/// Handler for paths missing from the site directory
async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "<!DOCTYPE html><html><head><title>404 Not Found</title></head><body><h1>Not Found</h1><p>The requested URL was not found on this server.</p></body></html>")
}

/// Full application: the static site with request tracking plus the dashboard
pub fn app(config: &ServerConfig, analytics: Arc<Analytics>) -> Router {
    let site = ServeDir::new(&config.site_dir).not_found_service(not_found.into_service());

    dashboard_router(analytics.clone())
        .fallback_service(site)
        .layer(RequestTrackingLayer::new(analytics))
}

pub async fn start_server(
    config: &ServerConfig,
    analytics: Arc<Analytics>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let dashboard = analytics.config().dashboard_path.clone();
    let app = app(config, analytics);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Web server starting on http://{} (dashboard at {})", addr, dashboard);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>()
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
