use async_trait::async_trait;

use crate::core::redis::RedisHandle;
use crate::domain::{
    AssessmentTemplate, Class, ClassAssessment, Course, ExamSession, GradeItem, GradeItemUpdate,
    GradingGroup, GradingSession, NewGradeItem, NewGradingSession, Question, RubricItem, Semester,
    SessionUpdate, Submission,
};
use crate::repositories::{ClassFilter, GradingStore, StoreError};

fn sessions_key(submission_id: &str) -> String {
    format!("gradeboard:submission:{submission_id}:sessions")
}

fn items_key(session_id: &str) -> String {
    format!("gradeboard:session:{session_id}:items")
}

/// Read-through cache for the two lists the engine re-reads constantly:
/// a submission's sessions and a session's grade items. Cache failures are
/// logged and fall through to the wrapped store.
pub(crate) struct CachedStore<S> {
    inner: S,
    redis: RedisHandle,
    ttl_seconds: u64,
}

impl<S: GradingStore> CachedStore<S> {
    pub(crate) fn new(inner: S, redis: RedisHandle, ttl_seconds: u64) -> Self {
        Self { inner, redis, ttl_seconds }
    }

    async fn cached<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.redis.get_json(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "Cache read failed");
                None
            }
        }
    }

    async fn store<T: serde::Serialize + Sync>(&self, key: &str, value: &T) {
        if let Err(err) = self.redis.set_json(key, value, self.ttl_seconds).await {
            tracing::warn!(key, error = %err, "Cache write failed");
        }
    }

    async fn forget(&self, keys: Vec<String>) {
        if let Err(err) = self.redis.delete_keys(&keys).await {
            tracing::warn!(keys = ?keys, error = %err, "Cache invalidation failed");
        }
    }
}

#[async_trait]
impl<S: GradingStore> GradingStore for CachedStore<S> {
    async fn find_submission(&self, submission_id: &str) -> Result<Option<Submission>, StoreError> {
        self.inner.find_submission(submission_id).await
    }

    async fn list_submissions_by_class_assessment(
        &self,
        class_assessment_id: &str,
    ) -> Result<Vec<Submission>, StoreError> {
        self.inner.list_submissions_by_class_assessment(class_assessment_id).await
    }

    async fn list_sessions_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Vec<GradingSession>, StoreError> {
        let key = sessions_key(submission_id);
        if let Some(sessions) = self.cached(&key).await {
            return Ok(sessions);
        }

        let sessions = self.inner.list_sessions_by_submission(submission_id).await?;
        self.store(&key, &sessions).await;
        Ok(sessions)
    }

    // Polling must observe server-side status changes, so single-session reads bypass the cache.
    async fn find_session(
        &self,
        submission_id: &str,
        session_id: &str,
    ) -> Result<Option<GradingSession>, StoreError> {
        self.inner.find_session(submission_id, session_id).await
    }

    async fn create_session(
        &self,
        request: &NewGradingSession,
    ) -> Result<GradingSession, StoreError> {
        let session = self.inner.create_session(request).await?;
        self.forget(vec![sessions_key(&request.submission_id)]).await;
        Ok(session)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<GradingSession, StoreError> {
        let session = self.inner.update_session(session_id, update).await?;
        self.forget(vec![sessions_key(&session.submission_id)]).await;
        Ok(session)
    }

    async fn list_grade_items(&self, session_id: &str) -> Result<Vec<GradeItem>, StoreError> {
        let key = items_key(session_id);
        if let Some(items) = self.cached(&key).await {
            return Ok(items);
        }

        let items = self.inner.list_grade_items(session_id).await?;
        self.store(&key, &items).await;
        Ok(items)
    }

    async fn create_grade_item(&self, request: &NewGradeItem) -> Result<GradeItem, StoreError> {
        let item = self.inner.create_grade_item(request).await?;
        self.forget(vec![items_key(&request.grading_session_id)]).await;
        Ok(item)
    }

    async fn update_grade_item(
        &self,
        item_id: &str,
        update: &GradeItemUpdate,
    ) -> Result<GradeItem, StoreError> {
        let item = self.inner.update_grade_item(item_id, update).await?;
        self.forget(vec![items_key(&item.grading_session_id)]).await;
        Ok(item)
    }

    async fn find_assessment_template(
        &self,
        template_id: &str,
    ) -> Result<Option<AssessmentTemplate>, StoreError> {
        self.inner.find_assessment_template(template_id).await
    }

    async fn list_questions(&self, template_id: &str) -> Result<Vec<Question>, StoreError> {
        self.inner.list_questions(template_id).await
    }

    async fn list_rubric_items(&self, question_id: &str) -> Result<Vec<RubricItem>, StoreError> {
        self.inner.list_rubric_items(question_id).await
    }

    async fn list_class_assessments(
        &self,
        class_id: &str,
    ) -> Result<Vec<ClassAssessment>, StoreError> {
        self.inner.list_class_assessments(class_id).await
    }

    async fn find_exam_session(
        &self,
        exam_session_id: &str,
    ) -> Result<Option<ExamSession>, StoreError> {
        self.inner.find_exam_session(exam_session_id).await
    }

    async fn find_grading_group(
        &self,
        grading_group_id: &str,
    ) -> Result<Option<GradingGroup>, StoreError> {
        self.inner.find_grading_group(grading_group_id).await
    }

    async fn find_class(&self, class_id: &str) -> Result<Option<Class>, StoreError> {
        self.inner.find_class(class_id).await
    }

    async fn list_classes(&self, filter: &ClassFilter) -> Result<Vec<Class>, StoreError> {
        self.inner.list_classes(filter).await
    }

    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError> {
        self.inner.find_course(course_id).await
    }

    async fn find_semester(&self, semester_id: &str) -> Result<Option<Semester>, StoreError> {
        self.inner.find_semester(semester_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn invalidate_submission(&self, submission_id: &str) {
        let list_key = sessions_key(submission_id);
        let sessions: Option<Vec<GradingSession>> = match self.cached(&list_key).await {
            Some(sessions) => Some(sessions),
            None => self.inner.list_sessions_by_submission(submission_id).await.ok(),
        };

        let mut keys: Vec<String> = sessions
            .unwrap_or_default()
            .iter()
            .map(|session| items_key(&session.id))
            .collect();
        keys.push(list_key);
        self.forget(keys).await;
        self.inner.invalidate_submission(submission_id).await;
    }
}
