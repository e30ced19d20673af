use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::types::{AssessmentType, GradingStatus, GradingType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub class_assessment_id: Option<String>,
    #[serde(default)]
    pub exam_session_id: Option<String>,
    /// Class owning the class assessment, when the backend includes it.
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub grading_group_id: Option<String>,
    #[serde(default, with = "crate::core::time::flexible::option")]
    pub submitted_at: Option<OffsetDateTime>,
    /// Cached denormalization, never authoritative.
    #[serde(default)]
    pub last_grade: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingLogEntry {
    pub action: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default, with = "crate::core::time::flexible::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSession {
    pub id: String,
    pub submission_id: String,
    pub status: GradingStatus,
    pub grading_type: GradingType,
    /// Aggregate grade; may be stale relative to the grade items.
    #[serde(default)]
    pub grade: Option<f64>,
    #[serde(default)]
    pub grade_item_count: u32,
    #[serde(with = "crate::core::time::flexible")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "crate::core::time::flexible::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub logs: Vec<GradingLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeItem {
    pub id: String,
    pub grading_session_id: String,
    pub rubric_item_id: String,
    pub score: f64,
    #[serde(default)]
    pub comments: Option<String>,
    /// Copy of the rubric maximum frozen when the row was written.
    #[serde(default)]
    pub rubric_item_max_score: f64,
    #[serde(with = "crate::core::time::flexible")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "crate::core::time::flexible::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl GradeItem {
    /// Recency key: `updated_at` first, `created_at` as tie-break. Rows never
    /// updated sort by their creation time.
    pub fn recency(&self) -> (OffsetDateTime, OffsetDateTime) {
        (self.updated_at.unwrap_or(self.created_at), self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricItem {
    pub id: String,
    #[serde(default)]
    pub question_id: String,
    #[serde(default)]
    pub description: String,
    pub max_score: f64,
    #[serde(default)]
    pub order_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(default)]
    pub assessment_template_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub order_index: i32,
}

/// A question together with its rubric, the unit reconciliation works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingQuestion {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub rubric_items: Vec<RubricItem>,
}

impl GradingQuestion {
    pub fn rubric_item(&self, rubric_item_id: &str) -> Option<&RubricItem> {
        self.rubric_items.iter().find(|item| item.id == rubric_item_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub assessment_type: Option<AssessmentType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAssessment {
    pub id: String,
    pub class_id: String,
    #[serde(default)]
    pub assessment_template_id: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSession {
    pub id: String,
    #[serde(default)]
    pub assessment_template_id: Option<String>,
    #[serde(default)]
    pub semester_id: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingGroup {
    pub id: String,
    #[serde(default)]
    pub lecturer_id: Option<String>,
    #[serde(default)]
    pub assessment_template_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    #[serde(default)]
    pub class_code: String,
    pub course_id: String,
    pub semester_id: String,
    #[serde(default)]
    pub lecturer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, with = "crate::core::time::flexible::option")]
    pub end_date: Option<OffsetDateTime>,
}

/// Publication and type metadata of the assessment a submission belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentMeta {
    pub template_name: String,
    #[serde(default)]
    pub assessment_type: Option<AssessmentType>,
    pub is_published: bool,
}

impl AssessmentMeta {
    pub fn new(template_name: impl Into<String>, is_published: bool) -> Self {
        Self { template_name: template_name.into(), assessment_type: None, is_published }
    }

    /// Explicit type when the template carries one, keyword inference otherwise.
    pub fn effective_type(&self) -> AssessmentType {
        self.assessment_type
            .unwrap_or_else(|| AssessmentType::infer_from_name(&self.template_name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGradingSession {
    pub submission_id: String,
    pub assessment_template_id: String,
    pub grading_type: GradingType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub grade: f64,
    pub status: GradingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGradeItem {
    pub grading_session_id: String,
    pub rubric_item_id: String,
    pub score: f64,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeItemUpdate {
    pub score: f64,
    pub comments: Option<String>,
}
