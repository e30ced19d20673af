use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    AssessmentTemplate, Class, ClassAssessment, Course, ExamSession, GradeItem, GradeItemUpdate,
    GradingGroup, GradingSession, NewGradeItem, NewGradingSession, Question, RubricItem, Semester,
    SessionUpdate, Submission,
};

pub(crate) mod cached;
pub(crate) mod portal;

pub(crate) use cached::CachedStore;
pub(crate) use portal::PortalStore;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("portal request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("portal returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode portal response: {0}")]
    Decode(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

/// Filter for class listings. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ClassFilter {
    pub(crate) semester_id: Option<String>,
    pub(crate) course_id: Option<String>,
    pub(crate) lecturer_id: Option<String>,
    pub(crate) student_id: Option<String>,
}

impl ClassFilter {
    pub(crate) fn for_student(student_id: impl Into<String>) -> Self {
        Self { student_id: Some(student_id.into()), ..Self::default() }
    }

    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::new();
        if let Some(value) = &self.semester_id {
            pairs.push(("semesterId", value.as_str()));
        }
        if let Some(value) = &self.course_id {
            pairs.push(("courseId", value.as_str()));
        }
        if let Some(value) = &self.lecturer_id {
            pairs.push(("lecturerId", value.as_str()));
        }
        if let Some(value) = &self.student_id {
            pairs.push(("studentId", value.as_str()));
        }
        pairs
    }

    pub(crate) fn matches(&self, class: &Class) -> bool {
        self.semester_id.as_deref().map_or(true, |id| class.semester_id == id)
            && self.course_id.as_deref().map_or(true, |id| class.course_id == id)
            && self
                .lecturer_id
                .as_deref()
                .map_or(true, |id| class.lecturer_id.as_deref() == Some(id))
    }
}

/// Everything the engine reads from or writes to the portal backend.
///
/// Lookups of single records return `Ok(None)` when the record does not exist;
/// transport and decoding failures are errors.
#[async_trait]
pub(crate) trait GradingStore: Send + Sync {
    async fn find_submission(&self, submission_id: &str) -> Result<Option<Submission>, StoreError>;

    async fn list_submissions_by_class_assessment(
        &self,
        class_assessment_id: &str,
    ) -> Result<Vec<Submission>, StoreError>;

    async fn list_sessions_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Vec<GradingSession>, StoreError>;

    async fn create_session(&self, request: &NewGradingSession)
        -> Result<GradingSession, StoreError>;

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<GradingSession, StoreError>;

    async fn list_grade_items(&self, session_id: &str) -> Result<Vec<GradeItem>, StoreError>;

    async fn create_grade_item(&self, request: &NewGradeItem) -> Result<GradeItem, StoreError>;

    async fn update_grade_item(
        &self,
        item_id: &str,
        update: &GradeItemUpdate,
    ) -> Result<GradeItem, StoreError>;

    async fn find_assessment_template(
        &self,
        template_id: &str,
    ) -> Result<Option<AssessmentTemplate>, StoreError>;

    async fn list_questions(&self, template_id: &str) -> Result<Vec<Question>, StoreError>;

    async fn list_rubric_items(&self, question_id: &str) -> Result<Vec<RubricItem>, StoreError>;

    async fn list_class_assessments(
        &self,
        class_id: &str,
    ) -> Result<Vec<ClassAssessment>, StoreError>;

    async fn find_exam_session(
        &self,
        exam_session_id: &str,
    ) -> Result<Option<ExamSession>, StoreError>;

    async fn find_grading_group(
        &self,
        grading_group_id: &str,
    ) -> Result<Option<GradingGroup>, StoreError>;

    async fn find_class(&self, class_id: &str) -> Result<Option<Class>, StoreError>;

    async fn list_classes(&self, filter: &ClassFilter) -> Result<Vec<Class>, StoreError>;

    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError>;

    async fn find_semester(&self, semester_id: &str) -> Result<Option<Semester>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Re-reads one session through the submission's session list, which is
    /// the only session lookup the portal exposes.
    async fn find_session(
        &self,
        submission_id: &str,
        session_id: &str,
    ) -> Result<Option<GradingSession>, StoreError> {
        let sessions = self.list_sessions_by_submission(submission_id).await?;
        Ok(sessions.into_iter().find(|session| session.id == session_id))
    }

    /// Drops cached session and grade-item lists for a submission.
    async fn invalidate_submission(&self, _submission_id: &str) {}
}
