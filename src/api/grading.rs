use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::grading::{
    AutoGradeRequest, AutoGradeResponse, CancelResponse, GradeEditsRequest,
};
use crate::services::grade_saving::{save_grades, SaveReport};
use crate::services::grading_context::load_grading_context;
use crate::services::reconciliation::{GradingDraft, ReconciledQuestions};
use crate::tasks::polling::PollStatus;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/submissions/:submission_id/auto-grade",
            post(start_auto_grade).delete(cancel_auto_grade),
        )
        .route("/submissions/:submission_id/status", get(poll_status))
        .route("/submissions/:submission_id/reconcile", post(reconcile_submission))
        .route("/submissions/:submission_id/grades", put(save_submission_grades))
}

async fn start_auto_grade(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
    payload: Option<Json<AutoGradeRequest>>,
) -> Result<(StatusCode, Json<AutoGradeResponse>), ApiError> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let started = state.polling().start_auto_grading(&submission_id, payload.template_id).await?;
    Ok((StatusCode::ACCEPTED, Json(started.into())))
}

async fn cancel_auto_grade(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.polling().cancel(&submission_id).await;
    Json(CancelResponse { cancelled })
}

async fn poll_status(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Json<PollStatus> {
    Json(state.polling().status(&submission_id).await)
}

async fn reconcile_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
    Json(payload): Json<GradeEditsRequest>,
) -> Result<Json<ReconciledQuestions>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let context =
        load_grading_context(state.store(), &submission_id, payload.template_id.as_deref())
            .await?;
    let mut draft = GradingDraft::new(
        context.submission.id,
        context.questions,
        context.sessions,
        context.items,
    );
    for edit in &payload.scores {
        draft
            .set_score(&edit.question_id, &edit.rubric_item_id, edit.score)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }
    for edit in &payload.comments {
        draft
            .set_comment(&edit.question_id, &edit.comment)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }

    Ok(Json(draft.reconciled().clone()))
}

async fn save_submission_grades(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
    Json(payload): Json<GradeEditsRequest>,
) -> Result<(StatusCode, Json<SaveReport>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let context =
        load_grading_context(state.store(), &submission_id, payload.template_id.as_deref())
            .await?;
    let report = save_grades(state.store(), &context, &payload.local_edits()).await?;

    let status = if report.is_complete() { StatusCode::OK } else { StatusCode::MULTI_STATUS };
    Ok((status, Json(report)))
}
