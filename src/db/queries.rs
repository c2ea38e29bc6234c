use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::{ensure_transition, JobStatusStore, StoreError};
use crate::models::job::{DetectionJob, JobStatus, JobTransition};
use crate::models::label::DetectedLabel;

/// Job status store backed by the `detection_jobs` table.
#[derive(Clone)]
pub struct PgJobStatusStore {
    pool: PgPool,
}

impl PgJobStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<DetectionJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Corrupt(format!("unknown status '{status_str}'")))?;
    let labels: Option<Json<Vec<DetectedLabel>>> = row.try_get("labels")?;

    Ok(DetectionJob {
        job_id: row.try_get("job_id")?,
        status,
        source_key: row.try_get("source_key")?,
        derived_key: row.try_get("derived_key")?,
        max_labels: row.try_get("max_labels")?,
        min_confidence: row.try_get("min_confidence")?,
        labels: labels.map(|Json(labels)| labels),
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl JobStatusStore for PgJobStatusStore {
    async fn create(&self, job: &DetectionJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO detection_jobs
                (job_id, status, source_key, max_labels, min_confidence, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.job_id)
        .bind(job.status.to_string())
        .bind(&job.source_key)
        .bind(job.max_labels)
        .bind(job.min_confidence)
        .bind(job.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate(job.job_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<DetectionJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, status, source_key, derived_key, max_labels, min_confidence,
                   labels, error_message, created_at, completed_at
            FROM detection_jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn conditional_update(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        transition: &JobTransition,
    ) -> Result<bool, StoreError> {
        ensure_transition(expected, transition)?;
        let target = transition.target().to_string();

        let result = match transition {
            JobTransition::Processing => {
                sqlx::query(
                    r#"
                    UPDATE detection_jobs
                    SET status = $1
                    WHERE job_id = $2 AND status = $3
                    "#,
                )
                .bind(&target)
                .bind(job_id)
                .bind(expected.to_string())
                .execute(&self.pool)
                .await?
            }
            JobTransition::Completed {
                derived_key,
                labels,
                completed_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE detection_jobs
                    SET status = $1, derived_key = $2, labels = $3, completed_at = $4
                    WHERE job_id = $5 AND status = $6
                    "#,
                )
                .bind(&target)
                .bind(derived_key)
                .bind(Json(labels))
                .bind(completed_at)
                .bind(job_id)
                .bind(expected.to_string())
                .execute(&self.pool)
                .await?
            }
            JobTransition::Failed {
                error_message,
                completed_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE detection_jobs
                    SET status = $1, error_message = $2, completed_at = $3
                    WHERE job_id = $4 AND status = $5
                    "#,
                )
                .bind(&target)
                .bind(error_message)
                .bind(completed_at)
                .bind(job_id)
                .bind(expected.to_string())
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
