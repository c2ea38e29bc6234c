use axum::{routing::get, routing::post, Router};

use crate::app_state::AppState;

pub mod health;
pub mod jobs;
pub mod metrics;

/// Job and health endpoints. The binary adds `/metrics` and the HTTP layers.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job))
        .route("/api/v1/jobs/base64", post(jobs::submit_job_base64))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .with_state(state)
}
