use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{DetectionJob, JobStatus, JobTransition};

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod queries;

/// Durable map from job id to job record.
///
/// Records are only introduced by `create`; all later writes go through
/// `conditional_update`, which applies only while the stored status still
/// equals `expected`.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    async fn create(&self, job: &DetectionJob) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<DetectionJob>, StoreError>;

    /// Returns `Ok(false)` when the record is missing or its status has
    /// moved on from `expected`.
    async fn conditional_update(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        transition: &JobTransition,
    ) -> Result<bool, StoreError>;

    /// Backend reachability, for health checks.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Reject edges the state machine does not allow before anything is written.
pub fn ensure_transition(expected: JobStatus, transition: &JobTransition) -> Result<(), StoreError> {
    let to = transition.target();
    if expected.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { from: expected, to })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Stored job record is invalid: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_transition() {
        assert!(ensure_transition(JobStatus::Pending, &JobTransition::Processing).is_ok());
        assert!(ensure_transition(JobStatus::Processing, &JobTransition::failed("x")).is_ok());
        assert!(matches!(
            ensure_transition(JobStatus::Completed, &JobTransition::failed("x")),
            Err(StoreError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Failed
            })
        ));
        assert!(ensure_transition(
            JobStatus::Pending,
            &JobTransition::completed("k".to_string(), Vec::new())
        )
        .is_err());
    }
}
