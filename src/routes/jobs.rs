use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::JobError;
use crate::models::api::{ErrorResponse, JobView, SubmitJobRequest, SubmitJobResponse};
use crate::models::job::JobStatus;
use crate::services::intake::SubmitParams;

fn accepted(job_id: Uuid) -> Json<SubmitJobResponse> {
    Json(SubmitJobResponse {
        job_id,
        status: JobStatus::Pending,
        message: "Image uploaded, detection queued".to_string(),
    })
}

fn bad_request(message: impl Into<String>) -> Response {
    JobError::Validation(message.into()).into_response()
}

/// POST /api/v1/jobs: Upload an image (multipart) for object detection.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitJobResponse>, Response> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut params = SubmitParams::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        match field.name() {
            Some("image") => {
                let data = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
                image_data = Some(data.to_vec());
            }
            Some("max_labels") => {
                let text = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                let value = text
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| bad_request("max_labels must be an integer"))?;
                params.max_labels = Some(value);
            }
            Some("min_confidence") => {
                let text = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                let value = text
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| bad_request("min_confidence must be a number"))?;
                params.min_confidence = Some(value);
            }
            _ => {}
        }
    }

    let image_data = image_data.ok_or_else(|| bad_request("Missing image data"))?;

    // Validate image format using the `image` crate
    if !image_data.is_empty() && image::guess_format(&image_data).is_err() {
        let body = ErrorResponse {
            error: "Unsupported image format".to_string(),
        };
        return Err((StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(body)).into_response());
    }

    let job_id = state
        .intake
        .submit(&image_data, params)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(accepted(job_id))
}

/// POST /api/v1/jobs/base64: Upload a base64-encoded image in a JSON body.
pub async fn submit_job_base64(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, JobError> {
    request
        .validate()
        .map_err(|report| JobError::Validation(report.to_string()))?;

    let image_data = base64::engine::general_purpose::STANDARD
        .decode(request.image.trim())
        .map_err(|_| JobError::Validation("image is not valid base64".to_string()))?;

    let params = SubmitParams {
        max_labels: request.max_labels,
        min_confidence: request.min_confidence,
    };
    let job_id = state.intake.submit(&image_data, params).await?;

    Ok(accepted(job_id))
}

/// GET /api/v1/jobs/{job_id}: Poll a job's status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, JobError> {
    let view = state.status.get_status(job_id).await?;
    Ok(Json(view))
}
