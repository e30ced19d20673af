//! Records exchanged with the portal backend and the enums that classify them.

pub mod errors;
pub mod models;
pub mod types;

pub use errors::ValidationError;
pub use models::{
    AssessmentMeta, AssessmentTemplate, Class, ClassAssessment, Course, ExamSession, GradeItem,
    GradeItemUpdate, GradingGroup, GradingLogEntry, GradingQuestion, GradingSession, NewGradeItem,
    NewGradingSession, Question, RubricItem, Semester, SessionUpdate, Submission,
};
pub use types::{AssessmentType, GradingStatus, GradingType};
