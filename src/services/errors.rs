use thiserror::Error;

use crate::domain::ValidationError;
use crate::repositories::StoreError;

#[derive(Debug, Error)]
pub(crate) enum GradingError {
    #[error("no assessment template could be resolved for submission {submission_id}")]
    TemplateNotFound { submission_id: String },
    #[error("submission {submission_id} not found")]
    SubmissionNotFound { submission_id: String },
    #[error("semester {semester_id} has already ended")]
    AlreadyEnded { semester_id: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
