use serde::Serialize;

use crate::domain::{
    GradeItemUpdate, GradingStatus, GradingType, NewGradeItem, NewGradingSession, SessionUpdate,
};
use crate::repositories::GradingStore;
use crate::services::errors::GradingError;
use crate::services::grading_context::GradingContext;
use crate::services::reconciliation::{reconcile, LocalEdits, PlannedWrite};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WrittenItem {
    pub(crate) rubric_item_id: String,
    pub(crate) grade_item_id: String,
    pub(crate) created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FailedItem {
    pub(crate) rubric_item_id: String,
    pub(crate) error: String,
}

/// Result of one save. Item writes are sequential and not rolled back, so a
/// save can end up partially applied; the session is only finalized when
/// every item write succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SaveReport {
    pub(crate) submission_id: String,
    pub(crate) session_id: String,
    pub(crate) created_session: bool,
    pub(crate) total_score: f64,
    pub(crate) written: Vec<WrittenItem>,
    pub(crate) failed: Vec<FailedItem>,
    pub(crate) finalized: bool,
    pub(crate) finalize_error: Option<String>,
}

impl SaveReport {
    pub(crate) fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.finalized
    }
}

/// Writes the reconciled grades of `context` overlaid with `edits`.
///
/// Every edit and score is validated before the first write; an unknown
/// target or a single out-of-range value rejects the save with nothing
/// written. Item writes all go out before the session's grade and status
/// update.
pub(crate) async fn save_grades(
    store: &dyn GradingStore,
    context: &GradingContext,
    edits: &LocalEdits,
) -> Result<SaveReport, GradingError> {
    edits.validate(&context.questions)?;
    let reconciled = reconcile(&context.questions, &context.sessions, &context.items, edits);
    let plan = reconciled.save_plan()?;
    let submission_id = context.submission.id.clone();

    let (session_id, created_session) = match plan.session_id.clone() {
        Some(session_id) => (session_id, false),
        None => {
            let session = store
                .create_session(&NewGradingSession {
                    submission_id: submission_id.clone(),
                    assessment_template_id: context.template_id.clone(),
                    grading_type: GradingType::Lecturer,
                })
                .await?;
            tracing::info!(
                submission_id = %submission_id,
                session_id = %session.id,
                "Created lecturer grading session for save"
            );
            (session.id, true)
        }
    };

    let mut written = Vec::with_capacity(plan.writes.len());
    let mut failed = Vec::new();
    for write in &plan.writes {
        match write_item(store, &session_id, write).await {
            Ok(item) => written.push(item),
            Err(err) => {
                tracing::warn!(
                    submission_id = %submission_id,
                    rubric_item_id = %write.rubric_item_id,
                    error = %err,
                    "Grade item write failed"
                );
                failed.push(FailedItem {
                    rubric_item_id: write.rubric_item_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    let mut finalized = false;
    let mut finalize_error = None;
    if failed.is_empty() {
        let update = SessionUpdate { grade: plan.total_score, status: GradingStatus::Completed };
        match store.update_session(&session_id, &update).await {
            Ok(_) => finalized = true,
            Err(err) => {
                tracing::warn!(
                    submission_id = %submission_id,
                    session_id = %session_id,
                    error = %err,
                    "Failed to finalize grading session"
                );
                finalize_error = Some(err.to_string());
            }
        }
    }

    store.invalidate_submission(&submission_id).await;

    let report = SaveReport {
        submission_id,
        session_id,
        created_session,
        total_score: plan.total_score,
        written,
        failed,
        finalized,
        finalize_error,
    };
    let result = if report.is_complete() { "complete" } else { "partial" };
    metrics::counter!("grade_saves_total", "result" => result).increment(1);

    Ok(report)
}

async fn write_item(
    store: &dyn GradingStore,
    session_id: &str,
    write: &PlannedWrite,
) -> Result<WrittenItem, GradingError> {
    let (item, created) = match &write.existing_item_id {
        Some(item_id) => {
            let update = GradeItemUpdate { score: write.score, comments: write.comments.clone() };
            (store.update_grade_item(item_id, &update).await?, false)
        }
        None => {
            let request = NewGradeItem {
                grading_session_id: session_id.to_string(),
                rubric_item_id: write.rubric_item_id.clone(),
                score: write.score,
                comments: write.comments.clone(),
            };
            (store.create_grade_item(&request).await?, true)
        }
    };

    Ok(WrittenItem {
        rubric_item_id: write.rubric_item_id.clone(),
        grade_item_id: item.id,
        created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValidationError;
    use crate::services::grading_context::load_grading_context;
    use crate::test_support::{self, MemoryStore, StoreCall};

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::default();
        let q1: &[(&str, f64)] = &[("r1", 5.0), ("r2", 5.0)];
        test_support::seed_template(&store, "tpl-1", "Assignment 1", &[("q1", q1)]);
        store.insert_submission(test_support::submission("sub-1", "st-1"));
        store
    }

    #[tokio::test]
    async fn creates_session_then_items_then_finalizes() {
        let store = seeded_store();
        let context = load_grading_context(&store, "sub-1", Some("tpl-1")).await.expect("context");
        let mut edits = LocalEdits::new();
        edits.set_score("q1", "r1", 4.0);
        edits.set_score("q1", "r2", 3.5);
        edits.set_comment("q1", "Good structure");

        let report = save_grades(&store, &context, &edits).await.expect("save");

        assert!(report.created_session);
        assert!(report.is_complete());
        assert_eq!(report.total_score, 7.5);
        assert_eq!(report.written.len(), 2);

        let writes = store.writes();
        assert!(matches!(writes.first(), Some(StoreCall::CreateSession { .. })));
        assert!(matches!(
            writes.last(),
            Some(StoreCall::UpdateSession { status: GradingStatus::Completed, .. })
        ));
        assert_eq!(store.invalidations(), vec!["sub-1".to_string()]);

        let sessions = store.sessions_for("sub-1");
        assert_eq!(sessions[0].grading_type, GradingType::Lecturer);
        assert_eq!(sessions[0].grade, Some(7.5));
    }

    #[tokio::test]
    async fn updates_existing_items_in_active_session() {
        let store = seeded_store();
        store.insert_session(test_support::session("gs-1", "sub-1", "COMPLETED", "AI", 1));
        store.insert_item(test_support::item("gi-1", "gs-1", "r1", 2.0, 5.0, 1, None));
        let context = load_grading_context(&store, "sub-1", Some("tpl-1")).await.expect("context");
        let mut edits = LocalEdits::new();
        edits.set_score("q1", "r1", 5.0);

        let report = save_grades(&store, &context, &edits).await.expect("save");

        assert!(!report.created_session);
        assert_eq!(report.session_id, "gs-1");
        assert_eq!(report.written[0], WrittenItem {
            rubric_item_id: "r1".to_string(),
            grade_item_id: "gi-1".to_string(),
            created: false,
        });
        assert!(report.written[1].created);
    }

    #[tokio::test]
    async fn over_max_score_writes_nothing() {
        let store = seeded_store();
        store.insert_session(test_support::session("gs-1", "sub-1", "COMPLETED", "AI", 1));
        let context = load_grading_context(&store, "sub-1", Some("tpl-1")).await.expect("context");
        let mut edits = LocalEdits::new();
        edits.set_score("q1", "r1", 4.0);
        edits.set_score("q1", "r2", 5.5);

        let err = save_grades(&store, &context, &edits).await.expect_err("rejected");

        assert!(matches!(err, GradingError::Validation(ValidationError::ScoreExceedsMax { .. })));
        assert!(store.writes().is_empty());
        assert!(store.invalidations().is_empty());
    }

    #[tokio::test]
    async fn unknown_edit_targets_write_nothing() {
        let store = seeded_store();
        let context = load_grading_context(&store, "sub-1", Some("tpl-1")).await.expect("context");

        let mut unknown_rubric = LocalEdits::new();
        unknown_rubric.set_score("q1", "r9", 999.0);
        let err = save_grades(&store, &context, &unknown_rubric).await.expect_err("rejected");
        assert!(matches!(
            err,
            GradingError::Validation(ValidationError::UnknownRubricItem { ref rubric_item_id })
                if rubric_item_id == "r9"
        ));

        let mut unknown_question = LocalEdits::new();
        unknown_question.set_score("q1", "r1", 4.0);
        unknown_question.set_score("q2", "r1", 4.0);
        let err = save_grades(&store, &context, &unknown_question).await.expect_err("rejected");
        assert!(matches!(
            err,
            GradingError::Validation(ValidationError::UnknownQuestion { ref question_id })
                if question_id == "q2"
        ));

        let mut stray_comment = LocalEdits::new();
        stray_comment.set_comment("q7", "note");
        assert!(save_grades(&store, &context, &stray_comment).await.is_err());

        assert!(store.writes().is_empty());
        assert!(store.sessions_for("sub-1").is_empty());
        assert!(store.invalidations().is_empty());
    }

    #[tokio::test]
    async fn failed_item_write_leaves_session_open() {
        let store = seeded_store();
        store.insert_session(test_support::session("gs-1", "sub-1", "PROCESSING", "LECTURER", 1));
        store.fail_item_writes_for("r2");
        let context = load_grading_context(&store, "sub-1", Some("tpl-1")).await.expect("context");
        let mut edits = LocalEdits::new();
        edits.set_score("q1", "r1", 4.0);
        edits.set_score("q1", "r2", 4.0);

        let report = save_grades(&store, &context, &edits).await.expect("partial save");

        assert!(!report.is_complete());
        assert!(!report.finalized);
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.failed[0].rubric_item_id, "r2");
        assert!(!store.writes().iter().any(|call| matches!(call, StoreCall::UpdateSession { .. })));
        assert_eq!(store.invalidations(), vec!["sub-1".to_string()]);
    }
}
