use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::repositories::StoreError;
use crate::services::errors::GradingError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
}

impl From<GradingError> for ApiError {
    fn from(err: GradingError) -> Self {
        match err {
            GradingError::TemplateNotFound { .. } | GradingError::SubmissionNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            GradingError::AlreadyEnded { .. } => Self::Conflict(err.to_string()),
            GradingError::Validation(err) => Self::BadRequest(err.to_string()),
            GradingError::Store(err) => err.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => {
                tracing::error!(error = %other, "Portal request failed");
                Self::BadGateway(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::BadGateway(message) => (StatusCode::BAD_GATEWAY, message),
        };
        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}
