//! Mapping from pipeline errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use research_pipeline::PipelineError;
use serde::Serialize;

/// JSON error body: `{error, message}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Error returned by route handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let (status, code) = match &err {
            PipelineError::InvalidConfig { .. } => (StatusCode::BAD_REQUEST, "invalid_config"),
            PipelineError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            PipelineError::Fetch(_) => (StatusCode::BAD_GATEWAY, "fetch_failed"),
            PipelineError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_pipeline::{FetchError, JobStatus};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PipelineError::invalid_config("bad"), StatusCode::BAD_REQUEST),
            (PipelineError::not_found("job", "x"), StatusCode::NOT_FOUND),
            (
                PipelineError::Fetch(FetchError::Timeout {
                    url: "https://a.com".to_string(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                PipelineError::InvalidTransition {
                    from: JobStatus::Finalized,
                    to: JobStatus::Qa,
                },
                StatusCode::CONFLICT,
            ),
            (PipelineError::NoCandidates, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }
}
