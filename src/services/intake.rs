use std::sync::Arc;
use uuid::Uuid;

use crate::db::JobStatusStore;
use crate::error::JobError;
use crate::models::job::DetectionJob;
use crate::services::queue::{JobMessage, JobQueue};
use crate::services::storage::ArtifactStore;

pub const DEFAULT_MAX_LABELS: i32 = 10;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 40.0;

/// Detection parameters chosen by the caller. Missing values take the
/// defaults; ranges are left for the detector to judge.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitParams {
    pub max_labels: Option<i32>,
    pub min_confidence: Option<f64>,
}

pub fn source_key(job_id: Uuid) -> String {
    format!("uploads/{job_id}")
}

/// Admits new jobs: stores the upload, records the job as PENDING, then
/// enqueues it for a worker.
///
/// If the record or the enqueue fails after the upload succeeded, the
/// caller gets an error and the uploaded blob stays behind unreferenced.
#[derive(Clone)]
pub struct Intake {
    store: Arc<dyn ArtifactStore>,
    jobs: Arc<dyn JobStatusStore>,
    queue: Arc<dyn JobQueue>,
}

impl Intake {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        jobs: Arc<dyn JobStatusStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self { store, jobs, queue }
    }

    pub async fn submit(&self, image_bytes: &[u8], params: SubmitParams) -> Result<Uuid, JobError> {
        if image_bytes.is_empty() {
            return Err(JobError::Validation("Missing image data".to_string()));
        }

        let max_labels = params.max_labels.unwrap_or(DEFAULT_MAX_LABELS);
        let min_confidence = params.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);

        let job_id = Uuid::new_v4();
        let key = source_key(job_id);
        let content_type = image::guess_format(image_bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");

        self.store.put(&key, image_bytes, content_type).await?;

        let job = DetectionJob::pending(job_id, key.clone(), max_labels, min_confidence);
        if let Err(e) = self.jobs.create(&job).await {
            tracing::warn!(job_id = %job_id, source_key = %key, "Job record not created, upload left orphaned");
            return Err(e.into());
        }

        let message = JobMessage {
            job_id,
            source_key: key,
            store_ref: self.store.store_ref().to_string(),
            max_labels,
            min_confidence,
        };
        if let Err(e) = self.queue.enqueue(&message).await {
            tracing::warn!(job_id = %job_id, "Enqueue failed, job will stay PENDING");
            return Err(e.into());
        }

        metrics::counter!("detection_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            bytes = image_bytes.len(),
            max_labels,
            min_confidence,
            "Detection job submitted"
        );

        Ok(job_id)
    }
}
