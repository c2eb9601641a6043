//! Ephemeral-store key layout for batches.
//!
//! - `{prefix}:batch:{batch_id}`       metadata hash
//! - `{prefix}:batch:{batch_id}:jobs`  one field per job name, JSON `JobRecord`

use crate::domain::BatchId;

pub(crate) const REFERENCE_ID: &str = "reference_id";
pub(crate) const JOB_NAMES: &str = "job_names";
pub(crate) const TOTAL_JOBS: &str = "total_jobs";
pub(crate) const COMPLETED_JOBS: &str = "completed_jobs";
pub(crate) const STATUS: &str = "status";
pub(crate) const CREATED_AT: &str = "created_at";
pub(crate) const UPDATED_AT: &str = "updated_at";
pub(crate) const RESULT: &str = "result";

#[derive(Debug, Clone)]
pub(crate) struct BatchKeys {
    pub meta: String,
    pub jobs: String,
}

impl BatchKeys {
    pub fn new(prefix: &str, batch_id: BatchId) -> Self {
        let meta = format!("{prefix}:batch:{batch_id}");
        let jobs = format!("{meta}:jobs");
        Self { meta, jobs }
    }
}
