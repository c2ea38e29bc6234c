use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::label::DetectedLabel;

/// Status of a detection job.
///
/// Moves only forward: `Pending -> Processing -> {Completed, Failed}`, with a
/// direct `Pending -> Failed` edge for messages that cannot be parsed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

/// A detection job as held by the status store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub source_key: String,
    pub derived_key: Option<String>,
    pub max_labels: i32,
    pub min_confidence: f64,
    pub labels: Option<Vec<DetectedLabel>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DetectionJob {
    /// A freshly admitted job.
    pub fn pending(job_id: Uuid, source_key: String, max_labels: i32, min_confidence: f64) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            source_key,
            derived_key: None,
            max_labels,
            min_confidence,
            labels: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Apply a transition in memory. Callers check the expected prior
    /// status first; this only writes the fields.
    pub fn apply(&mut self, transition: &JobTransition) {
        self.status = transition.target();
        match transition {
            JobTransition::Processing => {}
            JobTransition::Completed {
                derived_key,
                labels,
                completed_at,
            } => {
                self.derived_key = Some(derived_key.clone());
                self.labels = Some(labels.clone());
                self.completed_at = Some(*completed_at);
            }
            JobTransition::Failed {
                error_message,
                completed_at,
            } => {
                self.error_message = Some(error_message.clone());
                self.completed_at = Some(*completed_at);
            }
        }
    }
}

/// Fields written by a single status transition. Terminal variants carry
/// everything that becomes visible together with the new status.
#[derive(Debug, Clone, PartialEq)]
pub enum JobTransition {
    Processing,
    Completed {
        derived_key: String,
        labels: Vec<DetectedLabel>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error_message: String,
        completed_at: DateTime<Utc>,
    },
}

impl JobTransition {
    pub fn completed(derived_key: String, labels: Vec<DetectedLabel>) -> Self {
        JobTransition::Completed {
            derived_key,
            labels,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        JobTransition::Failed {
            error_message: error_message.into(),
            completed_at: Utc::now(),
        }
    }

    pub fn target(&self) -> JobStatus {
        match self {
            JobTransition::Processing => JobStatus::Processing,
            JobTransition::Completed { .. } => JobStatus::Completed,
            JobTransition::Failed { .. } => JobStatus::Failed,
        }
    }
}
