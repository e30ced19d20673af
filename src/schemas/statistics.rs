use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::{AssessmentMeta, AssessmentType, GradeItem, GradingSession};
use crate::services::aggregation::GradedSubmission;
use crate::services::session_selection::SessionGrade;
use crate::services::statistics::StatisticsScope;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SelectSessionRequest {
    #[serde(alias = "templateName")]
    #[validate(length(min = 1, message = "template_name must not be empty"))]
    pub(crate) template_name: String,
    #[serde(default)]
    #[serde(alias = "assessmentType")]
    pub(crate) assessment_type: Option<AssessmentType>,
    #[serde(alias = "isPublished")]
    pub(crate) is_published: bool,
    pub(crate) sessions: Vec<GradingSession>,
    #[serde(default)]
    pub(crate) items: Vec<GradeItem>,
}

impl SelectSessionRequest {
    pub(crate) fn meta(&self) -> AssessmentMeta {
        AssessmentMeta {
            template_name: self.template_name.clone(),
            assessment_type: self.assessment_type,
            is_published: self.is_published,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SelectSessionResponse {
    pub(crate) assessment_type: AssessmentType,
    pub(crate) session: Option<GradingSession>,
    pub(crate) grade: Option<SessionGrade>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AggregateRequest {
    pub(crate) submissions: Vec<GradedSubmission>,
    #[serde(default)]
    #[serde(alias = "topN")]
    #[validate(range(min = 1, message = "top_n must be positive"))]
    pub(crate) top_n: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub(crate) struct ReportQuery {
    #[serde(default)]
    #[serde(alias = "semesterId")]
    pub(crate) semester_id: Option<String>,
    #[serde(default)]
    #[serde(alias = "courseId")]
    pub(crate) course_id: Option<String>,
    #[serde(default)]
    #[serde(alias = "classId")]
    pub(crate) class_id: Option<String>,
    #[serde(default)]
    #[serde(alias = "lecturerId")]
    pub(crate) lecturer_id: Option<String>,
    #[serde(default)]
    #[serde(alias = "topN")]
    #[validate(range(min = 1, message = "top_n must be positive"))]
    pub(crate) top_n: Option<usize>,
}

impl ReportQuery {
    pub(crate) fn scope(&self) -> StatisticsScope {
        let non_empty = |value: &Option<String>| value.clone().filter(|value| !value.is_empty());
        StatisticsScope {
            semester_id: non_empty(&self.semester_id),
            course_id: non_empty(&self.course_id),
            class_id: non_empty(&self.class_id),
            lecturer_id: non_empty(&self.lecturer_id),
        }
    }
}
