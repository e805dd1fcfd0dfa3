//! Dashboard routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::render::render_dashboard;
use crate::dashboard::{DashboardError, DashboardQuery};
use crate::report::Report;
use crate::Analytics;

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = match self {
            DashboardError::Unauthorized => StatusCode::UNAUTHORIZED,
            DashboardError::BadDate(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

async fn build_report(analytics: &Analytics, query: &DashboardQuery) -> Result<Report, DashboardError> {
    let result = analytics
        .dashboard(query.k.as_deref(), query.date.as_deref())
        .await;
    if let Err(e) = &result {
        tracing::warn!("Dashboard request rejected: {}", e);
    }
    result
}

/// HTML dashboard
pub async fn dashboard_page(
    State(analytics): State<Arc<Analytics>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Html<String>, DashboardError> {
    let report = build_report(&analytics, &query).await?;
    let base = analytics.config().dashboard_path.trim_end_matches('/');
    Ok(Html(render_dashboard(&report, base, query.k.as_deref())))
}

/// Same report as JSON
pub async fn dashboard_json(
    State(analytics): State<Arc<Analytics>>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Report>, DashboardError> {
    Ok(Json(build_report(&analytics, &query).await?))
}
