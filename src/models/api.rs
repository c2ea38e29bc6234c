use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;
use crate::models::label::DetectedLabel;

/// JSON upload body: base64-encoded image plus optional detection parameters.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[garde(length(min = 1))]
    pub image: String,

    #[garde(skip)]
    pub max_labels: Option<i32>,

    #[garde(skip)]
    pub min_confidence: Option<f64>,
}

/// Response after a job has been admitted.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// What a polling client sees for a job.
///
/// Result fields only appear once the job is terminal; artifact URLs are
/// minted per request and expire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub labels: Option<Vec<DetectedLabel>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub original_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub processed_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
