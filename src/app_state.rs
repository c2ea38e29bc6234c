use std::sync::Arc;
use std::time::Duration;

use crate::db::JobStatusStore;
use crate::services::{
    intake::Intake, queue::JobQueue, status::StatusQuery, storage::ArtifactStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub intake: Intake,
    pub status: StatusQuery,
    pub jobs: Arc<dyn JobStatusStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn ArtifactStore>,
        jobs: Arc<dyn JobStatusStore>,
        queue: Arc<dyn JobQueue>,
        url_ttl: Duration,
    ) -> Self {
        Self {
            intake: Intake::new(storage.clone(), jobs.clone(), queue.clone()),
            status: StatusQuery::new(storage, jobs.clone(), url_ttl),
            jobs,
            queue,
        }
    }
}
