//! Batch/Job Tracker - バッチとジョブの進捗を ephemeral store に記録する
//!
//! # 設計原則
//! - ジョブ名の集合は作成時に固定（途中で追加・削除しない）
//! - 各ジョブのレコードが書き込みの単位（別ジョブ同士で read-modify-write しない）
//! - `total_jobs` / `completed_jobs` / `status` は毎回ジョブ状態から導出する
//! - store が落ちていても生成処理は止めない（書き込みは best-effort）

mod keys;
mod lookup;

pub use self::lookup::{ResolvedResult, ResultSource};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use self::keys::{
    BatchKeys, COMPLETED_JOBS, CREATED_AT, JOB_NAMES, REFERENCE_ID, RESULT, STATUS, TOTAL_JOBS,
    UPDATED_AT,
};
use crate::config::ConductorConfig;
use crate::domain::{
    Aggregate, BatchId, BatchView, JobRecord, JobState, JobStateView, JobView, Payload,
    derive_status,
};
use crate::ports::{Clock, EphemeralStore, StoreError, SystemClock};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("a batch must name at least one job")]
    EmptyJobSet,

    #[error("duplicate job name '{0}'")]
    DuplicateJobName(String),

    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    #[error("job '{job}' is not part of batch {batch_id}")]
    UnknownJob { batch_id: BatchId, job: String },

    /// The batch exists but its job-name list cannot be read.
    #[error("job set of batch {0} is unreadable")]
    UnknownJobSet(BatchId),

    #[error("corrupt record for batch {batch_id}: {reason}")]
    Corrupt { batch_id: BatchId, reason: String },

    #[error("record encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tracks batches of named jobs in the ephemeral store.
///
/// Cheap to share: wrap in `Arc` and hand to request handlers and the executor.
pub struct BatchTracker {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    batch_ttl: Duration,
}

impl BatchTracker {
    pub fn new(store: Arc<dyn EphemeralStore>, config: &ConductorConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            key_prefix: config.key_prefix.clone(),
            batch_ttl: config.batch_ttl(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn keys(&self, batch_id: BatchId) -> BatchKeys {
        BatchKeys::new(&self.key_prefix, batch_id)
    }

    /// Register a batch and one pending record per job name.
    ///
    /// Invalid job lists are rejected. An unreachable store is logged and
    /// otherwise ignored: the generation work does not depend on tracking.
    pub async fn create_batch<S: AsRef<str>>(
        &self,
        batch_id: BatchId,
        reference_id: &str,
        job_names: &[S],
    ) -> Result<(), TrackerError> {
        let job_names = validate_job_names(job_names)?;
        let outcome = self.write_new_batch(batch_id, reference_id, &job_names).await;
        if outcome.is_ok() {
            debug!(%batch_id, reference_id, jobs = job_names.len(), "batch created");
        }
        best_effort("create_batch", batch_id, outcome)
    }

    async fn write_new_batch(
        &self,
        batch_id: BatchId,
        reference_id: &str,
        job_names: &[String],
    ) -> Result<(), TrackerError> {
        let keys = self.keys(batch_id);
        let now = self.clock.now().to_rfc3339();
        let initial = derive_status(job_names.iter().map(|_| JobStateView::Pending));

        self.store
            .hset(
                &keys.meta,
                &[
                    (REFERENCE_ID, reference_id.to_string()),
                    (JOB_NAMES, serde_json::to_string(job_names)?),
                    (TOTAL_JOBS, initial.total_jobs.to_string()),
                    (COMPLETED_JOBS, initial.completed_jobs.to_string()),
                    (STATUS, initial.status.to_string()),
                    (CREATED_AT, now.clone()),
                    (UPDATED_AT, now),
                ],
            )
            .await?;

        let pending = serde_json::to_string(&JobRecord::pending())?;
        let job_fields: Vec<(&str, String)> = job_names
            .iter()
            .map(|name| (name.as_str(), pending.clone()))
            .collect();
        self.store.hset(&keys.jobs, &job_fields).await?;

        self.store.expire(&keys.meta, self.batch_ttl).await?;
        self.store.expire(&keys.jobs, self.batch_ttl).await?;
        Ok(())
    }

    /// Write one job's new state, then re-derive the batch aggregate.
    ///
    /// Safe to call concurrently for different job names of the same batch.
    pub async fn update_job(
        &self,
        batch_id: BatchId,
        job_name: &str,
        status: JobState,
        error: Option<String>,
    ) -> Result<(), TrackerError> {
        let outcome = self.write_job(batch_id, job_name, status, error).await;
        best_effort("update_job", batch_id, outcome)
    }

    async fn write_job(
        &self,
        batch_id: BatchId,
        job_name: &str,
        status: JobState,
        error: Option<String>,
    ) -> Result<(), TrackerError> {
        let keys = self.keys(batch_id);
        let meta = self.store.hgetall(&keys.meta).await?;
        if meta.is_empty() {
            return Err(TrackerError::BatchNotFound(batch_id));
        }
        let job_names = parse_job_names(batch_id, &meta)?;
        if !job_names.iter().any(|name| name == job_name) {
            return Err(TrackerError::UnknownJob {
                batch_id,
                job: job_name.to_string(),
            });
        }

        let previous = self
            .store
            .hget(&keys.jobs, job_name)
            .await?
            .and_then(|raw| decode_job(batch_id, job_name, &raw));
        let record = JobRecord::transition(previous.as_ref(), status, error, self.clock.now());
        self.store
            .hset(&keys.jobs, &[(job_name, serde_json::to_string(&record)?)])
            .await?;

        let aggregate = self.refresh_aggregate(batch_id, &keys, &job_names).await?;
        debug!(
            %batch_id,
            job = job_name,
            ?status,
            completed = aggregate.completed_jobs,
            total = aggregate.total_jobs,
            batch_status = %aggregate.status,
            "job updated"
        );
        Ok(())
    }

    /// Re-derive counters and status from every job record and store them.
    ///
    /// The stored `total_jobs` / `completed_jobs` / `status` fields are advisory:
    /// two writers may interleave their read and write here, so the last write
    /// can carry an older derivation. Only raw-hash readers see that;
    /// `get_batch` never reads these fields.
    async fn refresh_aggregate(
        &self,
        batch_id: BatchId,
        keys: &BatchKeys,
        job_names: &[String],
    ) -> Result<Aggregate, TrackerError> {
        let jobs = self.store.hgetall(&keys.jobs).await?;
        let views = job_views(batch_id, job_names, &jobs);
        let aggregate = derive_status(views.iter().map(|v| v.status));

        self.store
            .hset(
                &keys.meta,
                &[
                    (TOTAL_JOBS, aggregate.total_jobs.to_string()),
                    (COMPLETED_JOBS, aggregate.completed_jobs.to_string()),
                    (STATUS, aggregate.status.to_string()),
                    (UPDATED_AT, self.clock.now().to_rfc3339()),
                ],
            )
            .await?;
        Ok(aggregate)
    }

    /// Read a batch and its jobs in `job_names` order.
    ///
    /// `Ok(None)` when the batch is unknown or expired. A job whose record
    /// is missing is reported as `unknown`. Counters and status are derived
    /// from the job records read here, not from the stored aggregate.
    pub async fn get_batch(&self, batch_id: BatchId) -> Result<Option<BatchView>, TrackerError> {
        let keys = self.keys(batch_id);
        let meta = self.store.hgetall(&keys.meta).await?;
        if meta.is_empty() {
            return Ok(None);
        }

        let job_names = parse_job_names(batch_id, &meta)?;
        let reference_id = meta
            .get(REFERENCE_ID)
            .cloned()
            .ok_or_else(|| corrupt(batch_id, "missing reference_id"))?;
        let created_at = meta
            .get(CREATED_AT)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| corrupt(batch_id, "missing or invalid created_at"))?;
        let result = meta
            .get(RESULT)
            .map(|raw| Payload::from_json(raw))
            .transpose()?;

        let jobs = self.store.hgetall(&keys.jobs).await?;
        let views = job_views(batch_id, &job_names, &jobs);
        let aggregate = derive_status(views.iter().map(|v| v.status));

        Ok(Some(BatchView {
            batch_id,
            reference_id,
            job_names,
            total_jobs: aggregate.total_jobs,
            completed_jobs: aggregate.completed_jobs,
            status: aggregate.status,
            created_at,
            jobs: views,
            result,
        }))
    }

    /// Attach a result payload to the batch, whether or not its jobs are done.
    ///
    /// Refreshes the batch's retention window.
    pub async fn set_batch_result(
        &self,
        batch_id: BatchId,
        payload: &Payload,
    ) -> Result<(), TrackerError> {
        let outcome = self.write_result(batch_id, payload).await;
        best_effort("set_batch_result", batch_id, outcome)
    }

    async fn write_result(&self, batch_id: BatchId, payload: &Payload) -> Result<(), TrackerError> {
        let keys = self.keys(batch_id);
        if self.store.hget(&keys.meta, JOB_NAMES).await?.is_none() {
            return Err(TrackerError::BatchNotFound(batch_id));
        }
        self.store
            .hset(
                &keys.meta,
                &[
                    (RESULT, payload.to_json()),
                    (UPDATED_AT, self.clock.now().to_rfc3339()),
                ],
            )
            .await?;
        self.store.expire(&keys.meta, self.batch_ttl).await?;
        self.store.expire(&keys.jobs, self.batch_ttl).await?;
        debug!(%batch_id, "batch result attached");
        Ok(())
    }
}

/// Swallow store outages for write paths; everything else goes back to the caller.
fn best_effort(
    op: &'static str,
    batch_id: BatchId,
    outcome: Result<(), TrackerError>,
) -> Result<(), TrackerError> {
    match outcome {
        Err(TrackerError::Store(e)) => {
            warn!(%batch_id, error = %e, "{op} skipped: ephemeral store unavailable");
            Ok(())
        }
        other => other,
    }
}

fn validate_job_names<S: AsRef<str>>(job_names: &[S]) -> Result<Vec<String>, TrackerError> {
    if job_names.is_empty() {
        return Err(TrackerError::EmptyJobSet);
    }
    let mut seen = HashSet::with_capacity(job_names.len());
    let mut names = Vec::with_capacity(job_names.len());
    for name in job_names {
        let name = name.as_ref();
        if !seen.insert(name) {
            return Err(TrackerError::DuplicateJobName(name.to_string()));
        }
        names.push(name.to_string());
    }
    Ok(names)
}

/// No fallback list here: a batch whose job set is gone cannot be aggregated.
fn parse_job_names(
    batch_id: BatchId,
    meta: &HashMap<String, String>,
) -> Result<Vec<String>, TrackerError> {
    match meta
        .get(JOB_NAMES)
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
    {
        Some(names) => Ok(names),
        None => {
            warn!(%batch_id, "job set unreadable");
            Err(TrackerError::UnknownJobSet(batch_id))
        }
    }
}

fn decode_job(batch_id: BatchId, job_name: &str, raw: &str) -> Option<JobRecord> {
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(%batch_id, job = job_name, error = %e, "undecodable job record");
            None
        }
    }
}

fn job_views(
    batch_id: BatchId,
    job_names: &[String],
    jobs: &HashMap<String, String>,
) -> Vec<JobView> {
    job_names
        .iter()
        .map(|name| {
            let record = jobs
                .get(name)
                .and_then(|raw| decode_job(batch_id, name, raw));
            JobView::from_record(name.as_str(), record)
        })
        .collect()
}

fn corrupt(batch_id: BatchId, reason: &str) -> TrackerError {
    TrackerError::Corrupt {
        batch_id,
        reason: reason.to_string(),
    }
}
