use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::config::Settings;
use crate::domain::{
    AssessmentTemplate, Class, ClassAssessment, Course, ExamSession, GradeItem, GradeItemUpdate,
    GradingGroup, GradingSession, NewGradeItem, NewGradingSession, Question, RubricItem, Semester,
    SessionUpdate, Submission,
};
use crate::repositories::{ClassFilter, GradingStore, StoreError};

/// REST client for the portal backend.
#[derive(Clone)]
pub(crate) struct PortalStore {
    client: Client,
    base_url: String,
    token: String,
}

impl PortalStore {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let portal = settings.portal();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(portal.timeout_seconds))
            .build()
            .context("Failed to build portal HTTP client")?;

        Ok(Self {
            client,
            base_url: portal.base_url.trim_end_matches('/').to_string(),
            token: portal.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        let response = self.request(Method::GET, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_payload(response).await.map(Some)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self.request(Method::GET, path).query(query).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        read_payload(response).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let response = self.request(method, path).json(body).send().await?;
        read_payload(response).await
    }
}

async fn read_payload<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    let payload: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).map_err(|err| {
            if status.is_success() {
                StoreError::Decode(err.to_string())
            } else {
                StoreError::Status {
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&bytes).chars().take(200).collect(),
                }
            }
        })?
    };

    if !status.is_success() {
        return Err(StoreError::Status {
            status: status.as_u16(),
            message: extract_error_message(&payload),
        });
    }

    serde_json::from_value(unwrap_envelope(payload))
        .map_err(|err| StoreError::Decode(err.to_string()))
}

/// The portal wraps most payloads as `{ "result": ... }`; older endpoints use
/// `data`, and paged lists nest their rows under `items`.
fn unwrap_envelope(payload: Value) -> Value {
    let mut payload = payload;
    loop {
        let Value::Object(mut map) = payload else {
            return payload;
        };
        let inner = ["result", "data", "items"].iter().find_map(|key| map.remove(*key));
        match inner {
            Some(inner) => payload = inner,
            None => return Value::Object(map),
        }
    }
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(errors) = payload.get("errors") {
        if let Some(items) = errors.as_array() {
            let joined = items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
        if let Some(fields) = errors.as_object() {
            let joined = fields
                .values()
                .filter_map(Value::as_array)
                .flatten()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("title").and_then(Value::as_str))
        .or_else(|| payload.get("detail").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}

#[async_trait]
impl GradingStore for PortalStore {
    async fn find_submission(&self, submission_id: &str) -> Result<Option<Submission>, StoreError> {
        self.get_optional(&format!("Submission/{submission_id}")).await
    }

    async fn list_submissions_by_class_assessment(
        &self,
        class_assessment_id: &str,
    ) -> Result<Vec<Submission>, StoreError> {
        self.get_list("Submission", &[("classAssessmentId", class_assessment_id)]).await
    }

    async fn list_sessions_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Vec<GradingSession>, StoreError> {
        self.get_list(&format!("GradingSession/submission/{submission_id}"), &[]).await
    }

    async fn create_session(
        &self,
        request: &NewGradingSession,
    ) -> Result<GradingSession, StoreError> {
        self.send_json(Method::POST, "GradingSession", request).await
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<GradingSession, StoreError> {
        self.send_json(Method::PUT, &format!("GradingSession/{session_id}"), update).await
    }

    async fn list_grade_items(&self, session_id: &str) -> Result<Vec<GradeItem>, StoreError> {
        self.get_list(&format!("GradeItem/session/{session_id}"), &[]).await
    }

    async fn create_grade_item(&self, request: &NewGradeItem) -> Result<GradeItem, StoreError> {
        self.send_json(Method::POST, "GradeItem", request).await
    }

    async fn update_grade_item(
        &self,
        item_id: &str,
        update: &GradeItemUpdate,
    ) -> Result<GradeItem, StoreError> {
        self.send_json(Method::PUT, &format!("GradeItem/{item_id}"), update).await
    }

    async fn find_assessment_template(
        &self,
        template_id: &str,
    ) -> Result<Option<AssessmentTemplate>, StoreError> {
        self.get_optional(&format!("AssessmentTemplate/{template_id}")).await
    }

    async fn list_questions(&self, template_id: &str) -> Result<Vec<Question>, StoreError> {
        self.get_list("AssessmentQuestion", &[("assessmentTemplateId", template_id)]).await
    }

    async fn list_rubric_items(&self, question_id: &str) -> Result<Vec<RubricItem>, StoreError> {
        self.get_list(&format!("RubricItem/question/{question_id}"), &[]).await
    }

    async fn list_class_assessments(
        &self,
        class_id: &str,
    ) -> Result<Vec<ClassAssessment>, StoreError> {
        self.get_list("ClassAssessment", &[("classId", class_id)]).await
    }

    async fn find_exam_session(
        &self,
        exam_session_id: &str,
    ) -> Result<Option<ExamSession>, StoreError> {
        self.get_optional(&format!("ExamSession/{exam_session_id}")).await
    }

    async fn find_grading_group(
        &self,
        grading_group_id: &str,
    ) -> Result<Option<GradingGroup>, StoreError> {
        self.get_optional(&format!("GradingGroup/{grading_group_id}")).await
    }

    async fn find_class(&self, class_id: &str) -> Result<Option<Class>, StoreError> {
        self.get_optional(&format!("Class/{class_id}")).await
    }

    async fn list_classes(&self, filter: &ClassFilter) -> Result<Vec<Class>, StoreError> {
        let classes: Vec<Class> = self.get_list("Class", &filter.query_pairs()).await?;
        // Not every portal deployment honours the query filters.
        Ok(classes.into_iter().filter(|class| filter.matches(class)).collect())
    }

    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError> {
        self.get_optional(&format!("Course/{course_id}")).await
    }

    async fn find_semester(&self, semester_id: &str) -> Result<Option<Semester>, StoreError> {
        self.get_optional(&format!("Semester/{semester_id}")).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let response = self.request(Method::GET, "health").send().await?;
        if response.status().is_server_error() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                message: "portal health check failed".to_string(),
            });
        }
        Ok(())
    }
}
