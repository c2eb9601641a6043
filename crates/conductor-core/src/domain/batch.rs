//! Batch and job records, and the status derivation shared by writers and readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::BatchId;
use super::payload::Payload;
use super::state::{BatchStatus, JobState, JobStateView};

/// One job's record, stored as JSON under its name in the batch's job hash.
///
/// Design:
/// - Written only by the task executing that job.
/// - State transitions via `transition` (timestamps follow the new state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn pending() -> Self {
        Self {
            status: JobState::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Build the next record from the previous one (if any).
    ///
    /// - `Processing` stamps `started_at`.
    /// - `Completed` / `Failed` stamp `completed_at`; `started_at` is kept.
    /// - `error` survives only on `Failed`.
    pub fn transition(
        previous: Option<&JobRecord>,
        status: JobState,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let started_at = previous.and_then(|p| p.started_at);
        let completed_at = status.is_terminal().then_some(now);
        match status {
            JobState::Pending => Self::pending(),
            JobState::Processing => Self {
                status,
                started_at: Some(now),
                completed_at,
                error: None,
            },
            JobState::Completed => Self {
                status,
                started_at,
                completed_at,
                error: None,
            },
            JobState::Failed => Self {
                status,
                started_at,
                completed_at,
                error: Some(error.unwrap_or_else(|| "unspecified failure".to_string())),
            },
        }
    }
}

/// Aggregate counters and status, re-derived from job states on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub status: BatchStatus,
}

/// Derive the aggregate from the observed state of every job in the batch.
///
/// - any `Failed` -> `Failed`
/// - all `Completed` -> `Completed`
/// - otherwise `Processing` (`Unknown` counts as neither completed nor failed)
pub fn derive_status<I>(states: I) -> Aggregate
where
    I: IntoIterator<Item = JobStateView>,
{
    let mut total_jobs = 0;
    let mut completed_jobs = 0;
    let mut any_failed = false;
    for state in states {
        total_jobs += 1;
        match state {
            JobStateView::Completed => completed_jobs += 1,
            JobStateView::Failed => any_failed = true,
            _ => {}
        }
    }

    let status = if any_failed {
        BatchStatus::Failed
    } else if completed_jobs == total_jobs {
        BatchStatus::Completed
    } else {
        BatchStatus::Processing
    };

    Aggregate {
        total_jobs,
        completed_jobs,
        status,
    }
}

/// Serializable view of one job, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub name: String,
    pub status: JobStateView,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobView {
    pub fn from_record(name: impl Into<String>, record: Option<JobRecord>) -> Self {
        let name = name.into();
        match record {
            Some(r) => Self {
                name,
                status: r.status.into(),
                started_at: r.started_at,
                completed_at: r.completed_at,
                error: r.error,
            },
            None => Self {
                name,
                status: JobStateView::Unknown,
                started_at: None,
                completed_at: None,
                error: None,
            },
        }
    }
}

/// Batch status for API responses.
///
/// `jobs` follows `job_names` order; counters and status are derived from `jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchView {
    pub batch_id: BatchId,
    pub reference_id: String,
    pub job_names: Vec<String>,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub jobs: Vec<JobView>,
    pub result: Option<Payload>,
}

impl BatchView {
    pub fn job(&self, name: &str) -> Option<&JobView> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
