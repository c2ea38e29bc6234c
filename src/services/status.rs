use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::JobStatusStore;
use crate::error::JobError;
use crate::models::api::JobView;
use crate::models::job::JobStatus;
use crate::services::storage::ArtifactStore;

/// Read-only projection of job records for polling clients.
#[derive(Clone)]
pub struct StatusQuery {
    store: Arc<dyn ArtifactStore>,
    jobs: Arc<dyn JobStatusStore>,
    url_ttl: Duration,
}

impl StatusQuery {
    pub fn new(store: Arc<dyn ArtifactStore>, jobs: Arc<dyn JobStatusStore>, url_ttl: Duration) -> Self {
        Self { store, jobs, url_ttl }
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobView, JobError> {
        let job = self.jobs.get(job_id).await?.ok_or(JobError::NotFound(job_id))?;

        let mut view = JobView {
            job_id: job.job_id,
            status: job.status,
            created_at: job.created_at,
            completed_at: None,
            labels: None,
            original_image_url: None,
            processed_image_url: None,
            error_message: None,
        };

        match job.status {
            JobStatus::Pending | JobStatus::Processing => {}
            JobStatus::Completed => {
                view.completed_at = job.completed_at;
                view.labels = Some(job.labels.unwrap_or_default());
                view.original_image_url =
                    Some(self.store.sign_read_url(&job.source_key, self.url_ttl).await?);
                if let Some(derived_key) = &job.derived_key {
                    view.processed_image_url =
                        Some(self.store.sign_read_url(derived_key, self.url_ttl).await?);
                }
            }
            JobStatus::Failed => {
                view.error_message =
                    Some(job.error_message.unwrap_or_else(|| "Unknown error".to_string()));
            }
        }

        Ok(view)
    }
}
