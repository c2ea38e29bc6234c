use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::api::ErrorResponse;
use crate::services::annotate::AnnotateError;
use crate::services::detector::DetectorError;
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

/// Errors surfaced by intake, status queries and the worker.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Artifact storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Job status store error: {0}")]
    Store(#[from] StoreError),

    #[error("Label detection error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Malformed queue message: {0}")]
    MalformedMessage(String),

    #[error("Processing failed: {0}")]
    Processing(String),
}

impl JobError {
    /// Whether a retry later could succeed without any change in input.
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::Queue(_) => true,
            JobError::Storage(e) => match e {
                StorageError::S3(_) | StorageError::Timeout => true,
                StorageError::Status { code, .. } => *code >= 500,
                StorageError::NotFound(_) | StorageError::Config(_) => false,
            },
            // A duplicate id or an unreadable record will not heal on retry.
            JobError::Store(e) => matches!(e, StoreError::Database(_)),
            JobError::Detector(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<AnnotateError> for JobError {
    fn from(e: AnnotateError) -> Self {
        JobError::Processing(e.to_string())
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = match &self {
            JobError::Validation(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
