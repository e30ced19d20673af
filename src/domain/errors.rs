use thiserror::Error;

/// Rejection of a score or comment before anything is written.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("score {score} for rubric item {rubric_item_id} exceeds maximum {max_score}")]
    ScoreExceedsMax { rubric_item_id: String, score: f64, max_score: f64 },
    #[error("score {score} for rubric item {rubric_item_id} is negative")]
    NegativeScore { rubric_item_id: String, score: f64 },
    #[error("score for rubric item {rubric_item_id} is not a finite number")]
    NonFiniteScore { rubric_item_id: String },
    #[error("unknown rubric item {rubric_item_id}")]
    UnknownRubricItem { rubric_item_id: String },
    #[error("unknown question {question_id}")]
    UnknownQuestion { question_id: String },
}
