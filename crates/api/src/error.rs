//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use door_lock::LockError;
use face_match::EnrollmentError;
use pipeline::SessionError;
use serde::Serialize;
use storage::StorageError;
use thiserror::Error;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),

    #[error("Camera unavailable: {0}")]
    Camera(#[from] camera_capture::CameraError),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_secs: Option<u64>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Session(SessionError::LockedOut { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Session(SessionError::UnknownClass(_)) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::Pipeline(pipeline::PipelineError::Config(_))) => StatusCode::BAD_REQUEST,
            ApiError::Lock(LockError::EmergencyActive | LockError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ApiError::Camera(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let remaining_secs = match &self {
            ApiError::Session(SessionError::LockedOut { remaining }) => Some(remaining.as_secs()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            remaining_secs,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let locked = ApiError::from(SessionError::LockedOut {
            remaining: Duration::from_secs(42),
        });
        assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::from(LockError::EmergencyActive).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Conflict("busy".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(StorageError::NotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
