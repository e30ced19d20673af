use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request},
};
use time::{macros::datetime, Duration, OffsetDateTime};

use crate::core::{config::Settings, redis::RedisHandle, state::AppState};
use crate::domain::{
    AssessmentTemplate, Class, ClassAssessment, Course, ExamSession, GradeItem, GradeItemUpdate,
    GradingGroup, GradingQuestion, GradingSession, GradingStatus, GradingType, NewGradeItem,
    NewGradingSession, Question, RubricItem, Semester, SessionUpdate, Submission,
};
use crate::repositories::{ClassFilter, GradingStore, StoreError};

pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn set_test_env() {
    std::env::set_var("GRADEBOARD_ENV", "test");
    std::env::set_var("GRADEBOARD_STRICT_CONFIG", "0");
    std::env::remove_var("GRADEBOARD_API_PREFIX");
    std::env::remove_var("PROJECT_NAME");
    std::env::remove_var("PORTAL_API_BASE_URL");
    std::env::remove_var("PORTAL_API_TOKEN");
    std::env::remove_var("PORTAL_API_TIMEOUT_SECONDS");
    std::env::set_var("GRADING_POLL_INTERVAL_SECONDS", "2");
    std::env::set_var("GRADING_POLL_TIMEOUT_SECONDS", "300");
    std::env::set_var("GRADEBOARD_STATISTICS_CONCURRENCY", "16");
    std::env::set_var("GRADEBOARD_TOP_N", "20");
    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "6379");
    std::env::set_var("REDIS_DB", "1");
    std::env::remove_var("REDIS_PASSWORD");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
}

/// Builds state around an in-memory store with a Redis handle that is never
/// connected.
pub(crate) fn test_state(settings: Settings, store: MemoryStore) -> AppState {
    test_state_with_crawl_store(settings, store.clone(), store)
}

pub(crate) fn test_state_with_crawl_store(
    settings: Settings,
    store: MemoryStore,
    crawl_store: MemoryStore,
) -> AppState {
    let redis = RedisHandle::new(settings.redis().redis_url());
    AppState::new(settings, Arc::new(store), Arc::new(crawl_store), redis)
}

pub(crate) fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    let bytes = serde_json::to_vec(&body).expect("serialize body");
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("request body")
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

pub(crate) fn base_time() -> OffsetDateTime {
    datetime!(2025-10-01 08:00 UTC)
}

fn at_minute(minute: i64) -> OffsetDateTime {
    base_time() + Duration::minutes(minute)
}

pub(crate) fn session(
    id: &str,
    submission_id: &str,
    status: &str,
    grading_type: &str,
    created_minute: i64,
) -> GradingSession {
    GradingSession {
        id: id.to_string(),
        submission_id: submission_id.to_string(),
        status: serde_json::from_value(serde_json::json!(status)).expect("status"),
        grading_type: serde_json::from_value(serde_json::json!(grading_type)).expect("type"),
        grade: None,
        grade_item_count: 0,
        created_at: at_minute(created_minute),
        updated_at: None,
        logs: Vec::new(),
    }
}

pub(crate) fn item(
    id: &str,
    session_id: &str,
    rubric_item_id: &str,
    score: f64,
    max_score: f64,
    created_minute: i64,
    updated_minute: Option<i64>,
) -> GradeItem {
    GradeItem {
        id: id.to_string(),
        grading_session_id: session_id.to_string(),
        rubric_item_id: rubric_item_id.to_string(),
        score,
        comments: None,
        rubric_item_max_score: max_score,
        created_at: at_minute(created_minute),
        updated_at: updated_minute.map(at_minute),
    }
}

pub(crate) fn question(id: &str, rubric: &[(&str, f64)]) -> GradingQuestion {
    GradingQuestion {
        id: id.to_string(),
        title: format!("Question {id}"),
        rubric_items: rubric
            .iter()
            .enumerate()
            .map(|(index, (rubric_id, max_score))| RubricItem {
                id: rubric_id.to_string(),
                question_id: id.to_string(),
                description: format!("Criterion {rubric_id}"),
                max_score: *max_score,
                order_index: index as i32,
            })
            .collect(),
    }
}

pub(crate) fn submission(id: &str, student_id: &str) -> Submission {
    Submission {
        id: id.to_string(),
        student_id: student_id.to_string(),
        student_name: None,
        class_assessment_id: None,
        exam_session_id: None,
        class_id: None,
        grading_group_id: None,
        submitted_at: Some(base_time()),
        last_grade: None,
    }
}

/// Inserts a template with its questions; order follows the slice.
pub(crate) fn seed_template(
    store: &MemoryStore,
    template_id: &str,
    name: &str,
    questions: &[(&str, &[(&str, f64)])],
) {
    store.insert_template(template_id, name);
    let mut inner = store.lock();
    for (index, (question_id, rubric)) in questions.iter().enumerate() {
        inner.questions.push(Question {
            id: question_id.to_string(),
            assessment_template_id: template_id.to_string(),
            title: format!("Question {}", index + 1),
            order_index: index as i32,
        });
        inner.rubric_items.extend(question(question_id, rubric).rubric_items);
    }
}

/// A write the in-memory store accepted, in call order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StoreCall {
    CreateSession { submission_id: String, grading_type: GradingType },
    UpdateSession { session_id: String, grade: f64, status: GradingStatus },
    CreateGradeItem { session_id: String, rubric_item_id: String, score: f64 },
    UpdateGradeItem { item_id: String, score: f64 },
}

#[derive(Default)]
struct Inner {
    submissions: BTreeMap<String, Submission>,
    sessions: Vec<GradingSession>,
    items: Vec<GradeItem>,
    templates: HashMap<String, AssessmentTemplate>,
    questions: Vec<Question>,
    rubric_items: Vec<RubricItem>,
    class_assessments: Vec<ClassAssessment>,
    exam_sessions: HashMap<String, ExamSession>,
    grading_groups: HashMap<String, GradingGroup>,
    classes: BTreeMap<String, Class>,
    enrollments: HashSet<(String, String)>,
    courses: HashMap<String, Course>,
    semesters: HashMap<String, Semester>,
    writes: Vec<StoreCall>,
    invalidations: Vec<String>,
    scripts: HashMap<String, VecDeque<GradingStatus>>,
    lookups: HashMap<String, usize>,
    failing_rubric_items: HashSet<String>,
    failing_submissions: HashSet<String>,
    failing_listings: HashSet<String>,
    created_status: Option<GradingStatus>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_submission(&self, submission_id: &str) -> Result<(), StoreError> {
        if self.failing_submissions.contains(submission_id) {
            return Err(StoreError::Status {
                status: 503,
                message: format!("injected failure for {submission_id}"),
            });
        }
        Ok(())
    }

    fn check_listing(&self, parent_id: &str) -> Result<(), StoreError> {
        if self.failing_listings.contains(parent_id) {
            return Err(StoreError::Status {
                status: 502,
                message: format!("injected listing failure for {parent_id}"),
            });
        }
        Ok(())
    }

    fn check_rubric_item(&self, rubric_item_id: &str) -> Result<(), StoreError> {
        if self.failing_rubric_items.contains(rubric_item_id) {
            return Err(StoreError::Status {
                status: 500,
                message: format!("injected failure for {rubric_item_id}"),
            });
        }
        Ok(())
    }
}

/// In-memory `GradingStore` with write logs, scripted session statuses and
/// injectable failures.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert_submission(&self, submission: Submission) {
        self.lock().submissions.insert(submission.id.clone(), submission);
    }

    pub(crate) fn insert_session(&self, session: GradingSession) {
        self.lock().sessions.push(session);
    }

    pub(crate) fn insert_item(&self, item: GradeItem) {
        self.lock().items.push(item);
    }

    pub(crate) fn insert_template(&self, template_id: &str, name: &str) {
        self.lock().templates.insert(
            template_id.to_string(),
            AssessmentTemplate {
                id: template_id.to_string(),
                name: name.to_string(),
                assessment_type: None,
            },
        );
    }

    pub(crate) fn insert_grading_group(&self, group: GradingGroup) {
        self.lock().grading_groups.insert(group.id.clone(), group);
    }

    pub(crate) fn insert_class(&self, class: Class) {
        self.lock().classes.insert(class.id.clone(), class);
    }

    pub(crate) fn enroll(&self, student_id: &str, class_id: &str) {
        self.lock().enrollments.insert((student_id.to_string(), class_id.to_string()));
    }

    pub(crate) fn insert_class_assessment(&self, assessment: ClassAssessment) {
        self.lock().class_assessments.push(assessment);
    }

    pub(crate) fn insert_exam_session(&self, exam_session: ExamSession) {
        self.lock().exam_sessions.insert(exam_session.id.clone(), exam_session);
    }

    pub(crate) fn insert_course(&self, course: Course) {
        self.lock().courses.insert(course.id.clone(), course);
    }

    pub(crate) fn insert_semester(&self, semester: Semester) {
        self.lock().semesters.insert(semester.id.clone(), semester);
    }

    pub(crate) fn writes(&self) -> Vec<StoreCall> {
        self.lock().writes.clone()
    }

    pub(crate) fn invalidations(&self) -> Vec<String> {
        self.lock().invalidations.clone()
    }

    /// Sessions of a submission, oldest first.
    pub(crate) fn sessions_for(&self, submission_id: &str) -> Vec<GradingSession> {
        let mut sessions: Vec<GradingSession> = self
            .lock()
            .sessions
            .iter()
            .filter(|session| session.submission_id == submission_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Each later lookup of the session applies the next status in `statuses`;
    /// the last one sticks.
    pub(crate) fn script_statuses(&self, session_id: &str, statuses: Vec<GradingStatus>) {
        self.lock().scripts.insert(session_id.to_string(), statuses.into());
    }

    pub(crate) fn set_session_status(&self, session_id: &str, status: GradingStatus) {
        let mut inner = self.lock();
        inner.scripts.remove(session_id);
        if let Some(session) = inner.sessions.iter_mut().find(|session| session.id == session_id) {
            session.status = status;
        }
    }

    pub(crate) fn remove_session(&self, session_id: &str) {
        self.lock().sessions.retain(|session| session.id != session_id);
    }

    /// Status given to sessions created from now on. Defaults to processing.
    pub(crate) fn set_created_status(&self, status: GradingStatus) {
        self.lock().created_status = Some(status);
    }

    pub(crate) fn session_lookups(&self, session_id: &str) -> usize {
        self.lock().lookups.get(session_id).copied().unwrap_or(0)
    }

    pub(crate) fn fail_item_writes_for(&self, rubric_item_id: &str) {
        self.lock().failing_rubric_items.insert(rubric_item_id.to_string());
    }

    pub(crate) fn fail_session_lookups_for(&self, submission_id: &str) {
        self.lock().failing_submissions.insert(submission_id.to_string());
    }

    /// Fails the class-assessment listing of a class, or the submission
    /// listing of a class assessment, with the given id.
    pub(crate) fn fail_listings_for(&self, parent_id: &str) {
        self.lock().failing_listings.insert(parent_id.to_string());
    }

    pub(crate) fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.failing_rubric_items.clear();
        inner.failing_submissions.clear();
        inner.failing_listings.clear();
    }
}

#[async_trait]
impl GradingStore for MemoryStore {
    async fn find_submission(&self, submission_id: &str) -> Result<Option<Submission>, StoreError> {
        Ok(self.lock().submissions.get(submission_id).cloned())
    }

    async fn list_submissions_by_class_assessment(
        &self,
        class_assessment_id: &str,
    ) -> Result<Vec<Submission>, StoreError> {
        let inner = self.lock();
        inner.check_listing(class_assessment_id)?;
        Ok(inner
            .submissions
            .values()
            .filter(|submission| {
                submission.class_assessment_id.as_deref() == Some(class_assessment_id)
            })
            .cloned()
            .collect())
    }

    async fn list_sessions_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Vec<GradingSession>, StoreError> {
        let inner = self.lock();
        inner.check_submission(submission_id)?;
        Ok(inner
            .sessions
            .iter()
            .filter(|session| session.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn create_session(
        &self,
        request: &NewGradingSession,
    ) -> Result<GradingSession, StoreError> {
        let mut inner = self.lock();
        let id = inner.next_id();
        let session = GradingSession {
            id: format!("gs-new-{id}"),
            submission_id: request.submission_id.clone(),
            status: inner.created_status.unwrap_or(GradingStatus::Processing),
            grading_type: request.grading_type,
            grade: None,
            grade_item_count: 0,
            created_at: base_time() + Duration::hours(1 + id as i64),
            updated_at: None,
            logs: Vec::new(),
        };
        inner.sessions.push(session.clone());
        inner.writes.push(StoreCall::CreateSession {
            submission_id: request.submission_id.clone(),
            grading_type: request.grading_type,
        });
        Ok(session)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<GradingSession, StoreError> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .iter_mut()
            .find(|session| session.id == session_id)
            .ok_or_else(|| StoreError::not_found("GradingSession", session_id))?;
        session.grade = Some(update.grade);
        session.status = update.status;
        let session = session.clone();
        inner.writes.push(StoreCall::UpdateSession {
            session_id: session_id.to_string(),
            grade: update.grade,
            status: update.status,
        });
        Ok(session)
    }

    async fn list_grade_items(&self, session_id: &str) -> Result<Vec<GradeItem>, StoreError> {
        Ok(self
            .lock()
            .items
            .iter()
            .filter(|item| item.grading_session_id == session_id)
            .cloned()
            .collect())
    }

    async fn create_grade_item(&self, request: &NewGradeItem) -> Result<GradeItem, StoreError> {
        let mut inner = self.lock();
        inner.check_rubric_item(&request.rubric_item_id)?;
        let id = inner.next_id();
        let max_score = inner
            .rubric_items
            .iter()
            .find(|rubric| rubric.id == request.rubric_item_id)
            .map_or(0.0, |rubric| rubric.max_score);
        let item = GradeItem {
            id: format!("gi-new-{id}"),
            grading_session_id: request.grading_session_id.clone(),
            rubric_item_id: request.rubric_item_id.clone(),
            score: request.score,
            comments: request.comments.clone(),
            rubric_item_max_score: max_score,
            created_at: base_time() + Duration::hours(1 + id as i64),
            updated_at: None,
        };
        inner.items.push(item.clone());
        inner.writes.push(StoreCall::CreateGradeItem {
            session_id: request.grading_session_id.clone(),
            rubric_item_id: request.rubric_item_id.clone(),
            score: request.score,
        });
        Ok(item)
    }

    async fn update_grade_item(
        &self,
        item_id: &str,
        update: &GradeItemUpdate,
    ) -> Result<GradeItem, StoreError> {
        let mut inner = self.lock();
        let rubric_item_id = inner
            .items
            .iter()
            .find(|item| item.id == item_id)
            .map(|item| item.rubric_item_id.clone())
            .ok_or_else(|| StoreError::not_found("GradeItem", item_id))?;
        inner.check_rubric_item(&rubric_item_id)?;
        let stamp = base_time() + Duration::hours(1 + inner.next_id() as i64);

        let item = inner
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| StoreError::not_found("GradeItem", item_id))?;
        item.score = update.score;
        item.comments = update.comments.clone();
        item.updated_at = Some(stamp);
        let item = item.clone();
        inner
            .writes
            .push(StoreCall::UpdateGradeItem { item_id: item_id.to_string(), score: update.score });
        Ok(item)
    }

    async fn find_assessment_template(
        &self,
        template_id: &str,
    ) -> Result<Option<AssessmentTemplate>, StoreError> {
        Ok(self.lock().templates.get(template_id).cloned())
    }

    async fn list_questions(&self, template_id: &str) -> Result<Vec<Question>, StoreError> {
        Ok(self
            .lock()
            .questions
            .iter()
            .filter(|question| question.assessment_template_id == template_id)
            .cloned()
            .collect())
    }

    async fn list_rubric_items(&self, question_id: &str) -> Result<Vec<RubricItem>, StoreError> {
        Ok(self
            .lock()
            .rubric_items
            .iter()
            .filter(|rubric| rubric.question_id == question_id)
            .cloned()
            .collect())
    }

    async fn list_class_assessments(
        &self,
        class_id: &str,
    ) -> Result<Vec<ClassAssessment>, StoreError> {
        let inner = self.lock();
        inner.check_listing(class_id)?;
        Ok(inner
            .class_assessments
            .iter()
            .filter(|assessment| assessment.class_id == class_id)
            .cloned()
            .collect())
    }

    async fn find_exam_session(
        &self,
        exam_session_id: &str,
    ) -> Result<Option<ExamSession>, StoreError> {
        Ok(self.lock().exam_sessions.get(exam_session_id).cloned())
    }

    async fn find_grading_group(
        &self,
        grading_group_id: &str,
    ) -> Result<Option<GradingGroup>, StoreError> {
        Ok(self.lock().grading_groups.get(grading_group_id).cloned())
    }

    async fn find_class(&self, class_id: &str) -> Result<Option<Class>, StoreError> {
        Ok(self.lock().classes.get(class_id).cloned())
    }

    async fn list_classes(&self, filter: &ClassFilter) -> Result<Vec<Class>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .classes
            .values()
            .filter(|class| filter.matches(class))
            .filter(|class| {
                filter.student_id.as_ref().map_or(true, |student_id| {
                    inner.enrollments.contains(&(student_id.clone(), class.id.clone()))
                })
            })
            .cloned()
            .collect())
    }

    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError> {
        Ok(self.lock().courses.get(course_id).cloned())
    }

    async fn find_semester(&self, semester_id: &str) -> Result<Option<Semester>, StoreError> {
        Ok(self.lock().semesters.get(semester_id).cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_session(
        &self,
        submission_id: &str,
        session_id: &str,
    ) -> Result<Option<GradingSession>, StoreError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.check_submission(submission_id)?;
        *inner.lookups.entry(session_id.to_string()).or_default() += 1;

        let next = inner.scripts.get_mut(session_id).and_then(|script| {
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            }
        });
        let Some(session) = inner.sessions.iter_mut().find(|session| session.id == session_id)
        else {
            return Ok(None);
        };
        if let Some(status) = next {
            session.status = status;
        }
        Ok(Some(session.clone()))
    }

    async fn invalidate_submission(&self, submission_id: &str) {
        self.lock().invalidations.push(submission_id.to_string());
    }
}
