use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uuid::Uuid;

use crate::db::JobStatusStore;
use crate::error::JobError;
use crate::models::job::{JobStatus, JobTransition};
use crate::models::label::DetectedLabel;
use crate::services::annotate::{self, ANNOTATED_CONTENT_TYPE};
use crate::services::detector::{DetectorError, ImageSource, LabelDetector};
use crate::services::queue::{Delivery, JobMessage, JobQueue};
use crate::services::storage::{ArtifactStore, StorageError};

/// Each processing attempt writes its own artifact, so a losing attempt can
/// never overwrite the blob a committed COMPLETED record points at.
pub fn derived_key(job_id: Uuid, attempt: Uuid) -> String {
    format!("processed/{job_id}/{attempt}.jpg")
}

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    Completed { job_id: Uuid, labels: usize },
    Failed { job_id: Uuid, error: String },
    /// The job was already terminal when the message arrived.
    Skipped { job_id: Uuid, status: JobStatus },
    /// Another delivery of the same job wrote the terminal state first.
    Superseded { job_id: Uuid },
    DeadLettered { job_id: Option<Uuid>, reason: String },
}

/// Drives queued jobs from PENDING to a terminal state.
///
/// A message is acknowledged only after its job reached (or was found in) a
/// terminal state, or after it was dead-lettered. If the status store cannot
/// be written the message is left leased so the queue redelivers it.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn ArtifactStore>,
    jobs: Arc<dyn JobStatusStore>,
    queue: Arc<dyn JobQueue>,
    detector: Arc<dyn LabelDetector>,
    call_timeout: Duration,
}

impl Worker {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        jobs: Arc<dyn JobStatusStore>,
        queue: Arc<dyn JobQueue>,
        detector: Arc<dyn LabelDetector>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            jobs,
            queue,
            detector,
            call_timeout,
        }
    }

    /// Process the next message from the queue.
    /// Returns Ok(true) if a message was handled, Ok(false) if none was available.
    pub async fn run_once(&self) -> Result<bool, JobError> {
        let delivery = match self.queue.receive().await? {
            Some(d) => d,
            None => return Ok(false),
        };

        let outcome = self.handle_delivery(&delivery).await?;
        tracing::debug!(?outcome, "Message handled");
        Ok(true)
    }

    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<WorkOutcome, JobError> {
        let message = match JobMessage::parse(&delivery.body) {
            Ok(m) => m,
            Err(malformed) => {
                let reason = JobError::MalformedMessage(malformed.reason).to_string();
                if let Some(job_id) = malformed.job_id {
                    let failed = self
                        .jobs
                        .conditional_update(job_id, JobStatus::Pending, &JobTransition::failed(reason.clone()))
                        .await?;
                    if failed {
                        metrics::counter!("detection_jobs_failed_total").increment(1);
                    }
                }
                return self.dead_letter(delivery, malformed.job_id, reason).await;
            }
        };
        let job_id = message.job_id;

        let job = match self.jobs.get(job_id).await? {
            Some(job) => job,
            None => {
                return self
                    .dead_letter(delivery, Some(job_id), format!("No job record for {job_id}"))
                    .await;
            }
        };

        match job.status {
            status if status.is_terminal() => return self.skip(delivery, job_id, status).await,
            JobStatus::Pending => {
                let claimed = self
                    .jobs
                    .conditional_update(job_id, JobStatus::Pending, &JobTransition::Processing)
                    .await?;
                if !claimed {
                    // Raced with another delivery; follow whatever it wrote.
                    match self.jobs.get(job_id).await?.map(|j| j.status) {
                        Some(status) if status.is_terminal() => {
                            return self.skip(delivery, job_id, status).await
                        }
                        Some(_) => {}
                        None => {
                            return self
                                .dead_letter(delivery, Some(job_id), format!("No job record for {job_id}"))
                                .await;
                        }
                    }
                }
            }
            _ => {
                tracing::warn!(job_id = %job_id, "Job already PROCESSING, taking over redelivered message");
            }
        }

        tracing::info!(
            job_id = %job_id,
            source_key = %message.source_key,
            "Processing detection job"
        );

        let start = Instant::now();
        let transition = match self.process(&message).await {
            Ok(Some((key, labels))) => JobTransition::completed(key, labels),
            Ok(None) => {
                self.queue.ack(delivery).await?;
                tracing::info!(job_id = %job_id, "Job finalized elsewhere before artifact write");
                return Ok(WorkOutcome::Superseded { job_id });
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job processing failed");
                JobTransition::failed(e.to_string())
            }
        };

        let applied = self
            .jobs
            .conditional_update(job_id, JobStatus::Processing, &transition)
            .await?;
        self.queue.ack(delivery).await?;

        if !applied {
            tracing::info!(job_id = %job_id, "Terminal status already written by another delivery");
            return Ok(WorkOutcome::Superseded { job_id });
        }

        metrics::histogram!("detection_processing_seconds").record(start.elapsed().as_secs_f64());

        let outcome = match transition {
            JobTransition::Failed { error_message, .. } => {
                metrics::counter!("detection_jobs_failed_total").increment(1);
                WorkOutcome::Failed {
                    job_id,
                    error: error_message,
                }
            }
            JobTransition::Completed { labels, .. } => {
                metrics::counter!("detection_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    labels = labels.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
                WorkOutcome::Completed {
                    job_id,
                    labels: labels.len(),
                }
            }
            JobTransition::Processing => WorkOutcome::Superseded { job_id },
        };
        Ok(outcome)
    }

    /// Detection, rendering and artifact upload for a job that is PROCESSING.
    /// Returns `None` if the job left PROCESSING before the artifact was written.
    async fn process(&self, message: &JobMessage) -> Result<Option<(String, Vec<DetectedLabel>)>, JobError> {
        let job_id = message.job_id;

        let detect_start = Instant::now();
        let raw = timeout(
            self.call_timeout,
            self.detector.detect(
                ImageSource::Stored {
                    store_ref: &message.store_ref,
                    key: &message.source_key,
                },
                message.max_labels,
                message.min_confidence,
            ),
        )
        .await
        .map_err(|_| DetectorError::Timeout)??;

        let labels = annotate::extract_labels(&raw);
        tracing::info!(
            job_id = %job_id,
            detected = raw.len(),
            kept = labels.len(),
            detect_ms = detect_start.elapsed().as_millis() as u64,
            "Detection complete"
        );

        let source = timeout(self.call_timeout, self.store.get(&message.source_key))
            .await
            .map_err(|_| StorageError::Timeout)??;

        let to_draw = labels.clone();
        let rendered = tokio::task::spawn_blocking(move || annotate::render_annotated(&source, &to_draw))
            .await
            .map_err(|e| JobError::Processing(format!("Render task failed: {e}")))??;

        match self.jobs.get(job_id).await? {
            Some(job) if job.status == JobStatus::Processing => {}
            _ => return Ok(None),
        }

        let key = derived_key(job_id, Uuid::new_v4());
        timeout(
            self.call_timeout,
            self.store.put(&key, &rendered, ANNOTATED_CONTENT_TYPE),
        )
        .await
        .map_err(|_| StorageError::Timeout)??;

        tracing::debug!(job_id = %job_id, derived_key = %key, bytes = rendered.len(), "Annotated image stored");
        Ok(Some((key, labels)))
    }

    async fn skip(&self, delivery: &Delivery, job_id: Uuid, status: JobStatus) -> Result<WorkOutcome, JobError> {
        self.queue.ack(delivery).await?;
        metrics::counter!("detection_messages_skipped_total").increment(1);
        tracing::info!(job_id = %job_id, status = %status, "Job already terminal, skipping redelivered message");
        Ok(WorkOutcome::Skipped { job_id, status })
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        job_id: Option<Uuid>,
        reason: String,
    ) -> Result<WorkOutcome, JobError> {
        self.queue.dead_letter(delivery).await?;
        metrics::counter!("detection_messages_dead_lettered_total").increment(1);
        tracing::warn!(job_id = ?job_id, reason = %reason, "Message dead-lettered");
        Ok(WorkOutcome::DeadLettered { job_id, reason })
    }
}
