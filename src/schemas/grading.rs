use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::GradingSession;
use crate::services::reconciliation::LocalEdits;
use crate::tasks::polling::AutoGradeStarted;

#[derive(Debug, Default, Deserialize, Validate)]
pub(crate) struct AutoGradeRequest {
    #[serde(default)]
    #[serde(alias = "templateId")]
    #[validate(length(min = 1, message = "template_id must not be empty"))]
    pub(crate) template_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AutoGradeResponse {
    pub(crate) session: GradingSession,
    pub(crate) attempt: u64,
}

impl From<AutoGradeStarted> for AutoGradeResponse {
    fn from(started: AutoGradeStarted) -> Self {
        Self { session: started.session, attempt: started.attempt }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CancelResponse {
    pub(crate) cancelled: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ScoreEdit {
    #[serde(alias = "questionId")]
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    #[serde(alias = "rubricItemId")]
    #[validate(length(min = 1, message = "rubric_item_id must not be empty"))]
    pub(crate) rubric_item_id: String,
    pub(crate) score: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct CommentEdit {
    #[serde(alias = "questionId")]
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub(crate) question_id: String,
    pub(crate) comment: String,
}

/// Unsaved lecturer edits sent along with a reconcile or save request. Score
/// bounds are checked against the rubric after reconciliation, not here.
#[derive(Debug, Default, Deserialize, Validate)]
pub(crate) struct GradeEditsRequest {
    #[serde(default)]
    #[serde(alias = "templateId")]
    #[validate(length(min = 1, message = "template_id must not be empty"))]
    pub(crate) template_id: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) scores: Vec<ScoreEdit>,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) comments: Vec<CommentEdit>,
}

impl GradeEditsRequest {
    pub(crate) fn local_edits(&self) -> LocalEdits {
        let mut edits = LocalEdits::new();
        for edit in &self.scores {
            edits.set_score(edit.question_id.clone(), edit.rubric_item_id.clone(), edit.score);
        }
        for edit in &self.comments {
            edits.set_comment(edit.question_id.clone(), edit.comment.clone());
        }
        edits
    }
}
