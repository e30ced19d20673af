use futures::future::try_join_all;

use crate::domain::{GradeItem, GradingQuestion, GradingSession, Submission};
use crate::repositories::GradingStore;
use crate::services::errors::GradingError;
use crate::services::reconciliation::latest_session;
use crate::services::template_resolution::resolve_template;

/// Everything reconciliation needs for one submission.
#[derive(Debug, Clone)]
pub(crate) struct GradingContext {
    pub(crate) submission: Submission,
    pub(crate) template_id: String,
    pub(crate) questions: Vec<GradingQuestion>,
    pub(crate) sessions: Vec<GradingSession>,
    /// Items of the latest session only.
    pub(crate) items: Vec<GradeItem>,
}

impl GradingContext {
    pub(crate) fn active_session(&self) -> Option<&GradingSession> {
        latest_session(&self.sessions)
    }
}

pub(crate) async fn load_grading_context(
    store: &dyn GradingStore,
    submission_id: &str,
    template_id: Option<&str>,
) -> Result<GradingContext, GradingError> {
    let submission = store.find_submission(submission_id).await?.ok_or_else(|| {
        GradingError::SubmissionNotFound { submission_id: submission_id.to_string() }
    })?;

    let template_id = match template_id {
        Some(template_id) => template_id.to_string(),
        None => resolve_template(store, &submission).await?,
    };

    let questions = load_questions(store, &template_id).await?;
    let sessions = store.list_sessions_by_submission(submission_id).await?;
    let items = match latest_session(&sessions) {
        Some(session) => store.list_grade_items(&session.id).await?,
        None => Vec::new(),
    };

    Ok(GradingContext { submission, template_id, questions, sessions, items })
}

/// Questions of a template in display order, rubric items fetched concurrently.
pub(crate) async fn load_questions(
    store: &dyn GradingStore,
    template_id: &str,
) -> Result<Vec<GradingQuestion>, GradingError> {
    let mut questions = store.list_questions(template_id).await?;
    questions.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));

    let rubrics =
        try_join_all(questions.iter().map(|question| store.list_rubric_items(&question.id)))
            .await?;

    Ok(questions
        .into_iter()
        .zip(rubrics)
        .map(|(question, mut rubric_items)| {
            rubric_items
                .sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
            GradingQuestion { id: question.id, title: question.title, rubric_items }
        })
        .collect())
}
