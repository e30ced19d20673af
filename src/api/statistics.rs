use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::statistics::{
    AggregateRequest, ReportQuery, SelectSessionRequest, SelectSessionResponse,
};
use crate::services::aggregation::{aggregate_with_top_n, PerformanceReport};
use crate::services::session_selection::{grade_session, select_authoritative_session};
use crate::services::statistics::{build_performance_report, CrawlOptions};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/select-session", post(select_session))
        .route("/aggregate", post(aggregate_rows))
        .route("/report", get(performance_report))
}

async fn select_session(
    Json(payload): Json<SelectSessionRequest>,
) -> Result<Json<SelectSessionResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let meta = payload.meta();
    let selected = select_authoritative_session(&payload.sessions, &meta);
    let grade = selected.and_then(|session| grade_session(session, &payload.items));

    Ok(Json(SelectSessionResponse {
        assessment_type: meta.effective_type(),
        session: selected.cloned(),
        grade,
    }))
}

async fn aggregate_rows(
    State(state): State<AppState>,
    Json(payload): Json<AggregateRequest>,
) -> Result<Json<PerformanceReport>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let top_n = payload.top_n.unwrap_or(state.settings().statistics().top_n);
    Ok(Json(aggregate_with_top_n(&payload.submissions, top_n)))
}

async fn performance_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<PerformanceReport>, ApiError> {
    query.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let settings = state.settings().statistics();
    let options = CrawlOptions {
        concurrency: settings.concurrency,
        top_n: query.top_n.unwrap_or(settings.top_n),
    };
    let report = build_performance_report(state.crawl_store(), &query.scope(), options).await?;
    Ok(Json(report))
}
