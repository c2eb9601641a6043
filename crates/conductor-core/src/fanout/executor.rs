//! FanoutExecutor - バッチ内のジョブを並行実行する
//!
//! # フロー（ジョブごと）
//! 1. `processing` を書く（sub-task を spawn する前に await する）
//! 2. sub-task を JoinSet で並行実行し、全員の終了を待つ
//! 3. 全 sub-task 成功なら出力を durable store にマージ（ここが durability boundary）
//! 4. `completed` / `failed` を書く
//!
//! 1 つのジョブの失敗は兄弟ジョブを止めない。キャンセルもしない。
//! バッチに登録済みで spec の無いジョブ、タスクごと落ちたジョブも failed で終わらせる。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::job::{GenerationError, JobSpec, JobWorkspace};
use crate::domain::{BatchId, JobState, Payload};
use crate::ports::{DurableStore, IdGenerator};
use crate::tracker::{BatchTracker, TrackerError};

/// How one job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Generated and durably merged.
    Completed(Payload),
    Failed(String),
}

/// Per-job outcomes of one fan-out run, keyed by job name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanoutReport {
    pub jobs: BTreeMap<String, JobOutcome>,
}

impl FanoutReport {
    pub fn completed_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|o| matches!(o, JobOutcome::Completed(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.jobs.len() - self.completed_count()
    }

    /// Outputs of completed jobs as one JSON object.
    pub fn merged_output(&self) -> Payload {
        let merged: Map<String, Value> = self
            .jobs
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                JobOutcome::Completed(payload) => Some((name.clone(), payload.as_value().clone())),
                JobOutcome::Failed(_) => None,
            })
            .collect();
        Payload::new(Value::Object(merged))
    }
}

/// Drives the jobs of a batch to completion, each in isolation.
pub struct FanoutExecutor {
    tracker: Arc<BatchTracker>,
    durable: Arc<dyn DurableStore>,
}

impl FanoutExecutor {
    pub fn new(tracker: Arc<BatchTracker>, durable: Arc<dyn DurableStore>) -> Self {
        Self { tracker, durable }
    }

    /// Create a batch for `jobs` and start running it in the background.
    ///
    /// Returns as soon as the batch is registered; progress is observable
    /// only through the tracker.
    pub async fn submit(
        self: &Arc<Self>,
        ids: &dyn IdGenerator,
        reference_id: &str,
        jobs: Vec<JobSpec>,
    ) -> Result<BatchId, TrackerError> {
        let batch_id = ids.generate_batch_id();
        let names: Vec<&str> = jobs.iter().map(|j| j.name()).collect();
        self.tracker
            .create_batch(batch_id, reference_id, &names)
            .await?;
        self.spawn(batch_id, reference_id.to_string(), jobs);
        Ok(batch_id)
    }

    /// Fire-and-forget `run`: no handle, no returned error.
    pub fn spawn(self: &Arc<Self>, batch_id: BatchId, reference_id: String, jobs: Vec<JobSpec>) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.run(batch_id, &reference_id, jobs).await;
        });
    }

    /// Run every job concurrently and wait for all of them.
    ///
    /// Every job registered in the batch ends terminal: a registered name
    /// with no spec, or whose task dies, is recorded failed. Outputs of
    /// completed jobs are attached to the batch as its result once
    /// everything has finished.
    pub async fn run(
        &self,
        batch_id: BatchId,
        reference_id: &str,
        jobs: Vec<JobSpec>,
    ) -> FanoutReport {
        info!(%batch_id, reference_id, jobs = jobs.len(), "fan-out started");

        let mut report = FanoutReport::default();
        let supplied: HashSet<String> = jobs.iter().map(|j| j.name.clone()).collect();
        for name in self.registered_jobs(batch_id).await {
            if !supplied.contains(&name) {
                let outcome = self.fail_job(batch_id, &name, "no job spec supplied").await;
                report.jobs.insert(name, outcome);
            }
        }

        let mut set = JoinSet::new();
        let mut names = HashMap::new();
        for job in jobs {
            let tracker = Arc::clone(&self.tracker);
            let durable = Arc::clone(&self.durable);
            let reference_id = reference_id.to_string();
            let name = job.name.clone();
            let handle = set.spawn(async move {
                run_job(&tracker, durable.as_ref(), batch_id, &reference_id, job).await
            });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => {
                    let id = e.id();
                    let Some(name) = names.get(&id) else {
                        error!(%batch_id, error = %e, "unidentified job task ended abnormally");
                        continue;
                    };
                    let message = format!("job task ended abnormally: {e}");
                    (id, self.fail_job(batch_id, name, &message).await)
                }
            };
            if let Some(name) = names.remove(&id) {
                report.jobs.insert(name, outcome);
            }
        }

        if let Err(e) = self
            .tracker
            .set_batch_result(batch_id, &report.merged_output())
            .await
        {
            warn!(%batch_id, error = %e, "could not attach batch result");
        }

        info!(
            %batch_id,
            completed = report.completed_count(),
            failed = report.failed_count(),
            "fan-out finished"
        );
        report
    }

    /// Job names the batch was created with; empty when they cannot be read.
    async fn registered_jobs(&self, batch_id: BatchId) -> Vec<String> {
        match self.tracker.get_batch(batch_id).await {
            Ok(Some(view)) => view.job_names,
            Ok(None) => {
                warn!(%batch_id, "batch not found, running supplied jobs untracked");
                Vec::new()
            }
            Err(e) => {
                warn!(%batch_id, error = %e, "could not read registered jobs");
                Vec::new()
            }
        }
    }

    async fn fail_job(&self, batch_id: BatchId, name: &str, message: &str) -> JobOutcome {
        warn!(%batch_id, job = name, error = message, "job failed");
        if let Err(e) = self
            .tracker
            .update_job(batch_id, name, JobState::Failed, Some(message.to_string()))
            .await
        {
            warn!(%batch_id, job = name, error = %e, "could not record job end");
        }
        JobOutcome::Failed(message.to_string())
    }
}

async fn run_job(
    tracker: &BatchTracker,
    durable: &dyn DurableStore,
    batch_id: BatchId,
    reference_id: &str,
    job: JobSpec,
) -> JobOutcome {
    let JobSpec { name, subtasks } = job;

    // processing は sub-task の spawn より先に書き終える
    match tracker
        .update_job(batch_id, &name, JobState::Processing, None)
        .await
    {
        Ok(()) => {}
        Err(e @ TrackerError::UnknownJob { .. }) => {
            warn!(%batch_id, job = %name, "job is not part of the batch, skipped");
            return JobOutcome::Failed(e.to_string());
        }
        Err(e) => warn!(%batch_id, job = %name, error = %e, "could not record job start"),
    }

    let workspace = Arc::new(JobWorkspace::new(name.as_str()));
    let mut set = JoinSet::new();
    let mut subtask_names = HashMap::new();
    for subtask in subtasks {
        let workspace = Arc::clone(&workspace);
        let subtask_name = subtask.name().to_string();
        let handle = set.spawn(async move { subtask.run(&workspace).await });
        subtask_names.insert(handle.id(), subtask_name);
    }

    let mut errors = Vec::new();
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((_, Err(e))) => errors.push(e.to_string()),
            Err(e) => {
                let subtask = subtask_names
                    .get(&e.id())
                    .map(String::as_str)
                    .unwrap_or("unidentified");
                let failure = GenerationError::new(subtask, format!("ended abnormally: {e}"));
                errors.push(failure.to_string());
            }
        }
    }

    let outcome = if errors.is_empty() {
        let payload = Payload::new(Value::Object(workspace.snapshot().await));
        match durable
            .merge_job_result(reference_id, batch_id, &name, &payload)
            .await
        {
            Ok(()) => JobOutcome::Completed(payload),
            Err(e) => JobOutcome::Failed(format!("durable merge failed: {e}")),
        }
    } else {
        JobOutcome::Failed(errors.join("; "))
    };

    let (status, error) = match &outcome {
        JobOutcome::Completed(_) => (JobState::Completed, None),
        JobOutcome::Failed(message) => {
            warn!(%batch_id, job = %name, error = %message, "job failed");
            (JobState::Failed, Some(message.clone()))
        }
    };
    if let Err(e) = tracker.update_job(batch_id, &name, status, error).await {
        warn!(%batch_id, job = %name, error = %e, "could not record job end");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConductorConfig;
    use crate::domain::{BatchStatus, JobStateView};
    use crate::fanout::SubTask;
    use crate::impls::{InMemoryDurableStore, InMemoryEphemeralStore};
    use crate::ports::{DurableError, DurableRecord, SystemClock, UlidGenerator};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Barrier;
    use ulid::Ulid;

    struct Emit {
        key: &'static str,
        value: Value,
    }

    #[async_trait]
    impl SubTask for Emit {
        fn name(&self) -> &str {
            self.key
        }

        async fn run(&self, ws: &JobWorkspace) -> Result<(), GenerationError> {
            ws.insert(self.key, self.value.clone()).await;
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl SubTask for Fail {
        fn name(&self) -> &str {
            "tts"
        }

        async fn run(&self, _ws: &JobWorkspace) -> Result<(), GenerationError> {
            Err(GenerationError::new("tts", "voice model offline"))
        }
    }

    struct Panic;

    #[async_trait]
    impl SubTask for Panic {
        fn name(&self) -> &str {
            "panic"
        }

        async fn run(&self, _ws: &JobWorkspace) -> Result<(), GenerationError> {
            panic!("renderer crashed");
        }
    }

    /// Only finishes if its sibling is running at the same time.
    struct Rendezvous {
        key: &'static str,
        barrier: Arc<Barrier>,
    }

    #[async_trait]
    impl SubTask for Rendezvous {
        fn name(&self) -> &str {
            self.key
        }

        async fn run(&self, ws: &JobWorkspace) -> Result<(), GenerationError> {
            self.barrier.wait().await;
            ws.insert(self.key, json!(true)).await;
            Ok(())
        }
    }

    /// Records what the tracker says about its own job while it runs.
    struct ObserveOwnStatus {
        tracker: Arc<BatchTracker>,
        batch_id: BatchId,
    }

    #[async_trait]
    impl SubTask for ObserveOwnStatus {
        fn name(&self) -> &str {
            "observe"
        }

        async fn run(&self, ws: &JobWorkspace) -> Result<(), GenerationError> {
            let view = self
                .tracker
                .get_batch(self.batch_id)
                .await
                .map_err(|e| GenerationError::new("observe", e.to_string()))?
                .ok_or_else(|| GenerationError::new("observe", "batch missing"))?;
            let status = view
                .job(ws.job_name())
                .map(|j| j.status)
                .ok_or_else(|| GenerationError::new("observe", "job missing"))?;
            ws.insert("seen", json!(status)).await;
            Ok(())
        }
    }

    struct RejectingDurable;

    #[async_trait]
    impl DurableStore for RejectingDurable {
        async fn merge_job_result(
            &self,
            record_id: &str,
            _batch_id: BatchId,
            _job_name: &str,
            _payload: &Payload,
        ) -> Result<(), DurableError> {
            Err(DurableError::Rejected {
                record_id: record_id.to_string(),
                reason: "constraint violation".into(),
            })
        }

        async fn find_by_batch_id(
            &self,
            _batch_id: BatchId,
        ) -> Result<Option<DurableRecord>, DurableError> {
            Ok(None)
        }
    }

    struct PanickingDurable;

    #[async_trait]
    impl DurableStore for PanickingDurable {
        async fn merge_job_result(
            &self,
            _record_id: &str,
            _batch_id: BatchId,
            _job_name: &str,
            _payload: &Payload,
        ) -> Result<(), DurableError> {
            panic!("connection pool poisoned");
        }

        async fn find_by_batch_id(
            &self,
            _batch_id: BatchId,
        ) -> Result<Option<DurableRecord>, DurableError> {
            Ok(None)
        }
    }

    struct Fixture {
        store: Arc<InMemoryEphemeralStore>,
        tracker: Arc<BatchTracker>,
        durable: Arc<InMemoryDurableStore>,
        executor: Arc<FanoutExecutor>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEphemeralStore::new());
        let tracker = Arc::new(BatchTracker::new(store.clone(), &ConductorConfig::default()));
        let durable = Arc::new(InMemoryDurableStore::new());
        let executor = Arc::new(FanoutExecutor::new(tracker.clone(), durable.clone()));
        Fixture {
            store,
            tracker,
            durable,
            executor,
        }
    }

    fn new_batch_id() -> BatchId {
        BatchId::from_ulid(Ulid::new())
    }

    fn emit(key: &'static str, value: Value) -> Emit {
        Emit { key, value }
    }

    #[tokio::test]
    async fn failing_job_does_not_stop_siblings() {
        let f = fixture();
        let id = new_batch_id();
        f.tracker
            .create_batch(id, "scenario-3", &["job1", "job2", "job3"])
            .await
            .unwrap();

        let jobs = vec![
            JobSpec::new("job1").with_subtask(emit("image_url", json!("img-1"))),
            JobSpec::new("job2")
                .with_subtask(emit("image_url", json!("img-2")))
                .with_subtask(Fail),
            JobSpec::new("job3").with_subtask(emit("image_url", json!("img-3"))),
        ];
        let report = f.executor.run(id, "scenario-3", jobs).await;

        assert_eq!(report.completed_count(), 2);
        assert!(matches!(
            report.jobs["job2"],
            JobOutcome::Failed(ref m) if m.contains("voice model offline")
        ));

        let view = f.tracker.get_batch(id).await.unwrap().unwrap();
        assert_eq!(view.status, BatchStatus::Failed);
        assert_eq!(view.job("job1").unwrap().status, JobStateView::Completed);
        assert_eq!(view.job("job3").unwrap().status, JobStateView::Completed);
        assert!(!view.job("job2").unwrap().error.as_deref().unwrap().is_empty());

        let record = f.durable.get("scenario-3").await.unwrap();
        assert!(record.results.contains_key("job1"));
        assert!(record.results.contains_key("job3"));
        assert!(!record.results.contains_key("job2"));
    }

    #[tokio::test]
    async fn subtasks_of_a_job_run_concurrently_into_one_workspace() {
        let f = fixture();
        let id = new_batch_id();
        f.tracker.create_batch(id, "quiz-2", &["media"]).await.unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let jobs = vec![
            JobSpec::new("media")
                .with_subtask(Rendezvous {
                    key: "image",
                    barrier: barrier.clone(),
                })
                .with_subtask(Rendezvous {
                    key: "audio",
                    barrier,
                }),
        ];

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            f.executor.run(id, "quiz-2", jobs),
        )
        .await
        .expect("sub-tasks should not run one after another");

        let JobOutcome::Completed(payload) = &report.jobs["media"] else {
            panic!("media job should complete");
        };
        assert_eq!(payload.as_value(), &json!({ "image": true, "audio": true }));
    }

    #[tokio::test]
    async fn durable_failure_fails_the_job() {
        let store = Arc::new(InMemoryEphemeralStore::new());
        let tracker = Arc::new(BatchTracker::new(store, &ConductorConfig::default()));
        let executor = FanoutExecutor::new(tracker.clone(), Arc::new(RejectingDurable));
        let id = new_batch_id();
        tracker.create_batch(id, "r", &["a"]).await.unwrap();

        let report = executor
            .run(id, "r", vec![JobSpec::new("a").with_subtask(emit("k", json!(1)))])
            .await;

        assert!(matches!(
            &report.jobs["a"],
            JobOutcome::Failed(m) if m.contains("durable merge failed")
        ));
        let view = tracker.get_batch(id).await.unwrap().unwrap();
        assert_eq!(view.status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn panicking_subtask_fails_only_its_job() {
        let f = fixture();
        let id = new_batch_id();
        f.tracker.create_batch(id, "r", &["ok", "boom"]).await.unwrap();

        let report = f
            .executor
            .run(
                id,
                "r",
                vec![
                    JobSpec::new("ok").with_subtask(emit("k", json!(1))),
                    JobSpec::new("boom").with_subtask(Panic),
                ],
            )
            .await;

        assert!(matches!(report.jobs["ok"], JobOutcome::Completed(_)));
        assert!(matches!(
            &report.jobs["boom"],
            JobOutcome::Failed(m) if m.contains("sub-task 'panic'")
        ));
        let view = f.tracker.get_batch(id).await.unwrap().unwrap();
        assert_eq!(view.job("boom").unwrap().status, JobStateView::Failed);
    }

    #[tokio::test]
    async fn panicking_durable_store_fails_the_job() {
        let store = Arc::new(InMemoryEphemeralStore::new());
        let tracker = Arc::new(BatchTracker::new(store, &ConductorConfig::default()));
        let executor = FanoutExecutor::new(tracker.clone(), Arc::new(PanickingDurable));
        let id = new_batch_id();
        tracker.create_batch(id, "r", &["a"]).await.unwrap();

        let report = executor
            .run(id, "r", vec![JobSpec::new("a").with_subtask(emit("k", json!(1)))])
            .await;

        assert!(matches!(
            &report.jobs["a"],
            JobOutcome::Failed(m) if m.contains("job task ended abnormally")
        ));
        let view = tracker.get_batch(id).await.unwrap().unwrap();
        assert_eq!(view.job("a").unwrap().status, JobStateView::Failed);
        assert_eq!(view.status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn registered_job_without_spec_is_failed() {
        let f = fixture();
        let id = new_batch_id();
        f.tracker.create_batch(id, "r", &["a", "b"]).await.unwrap();

        let report = f
            .executor
            .run(id, "r", vec![JobSpec::new("a").with_subtask(emit("k", json!(1)))])
            .await;

        assert!(matches!(report.jobs["a"], JobOutcome::Completed(_)));
        assert!(matches!(
            &report.jobs["b"],
            JobOutcome::Failed(m) if m == "no job spec supplied"
        ));
        let view = f.tracker.get_batch(id).await.unwrap().unwrap();
        let b = view.job("b").unwrap();
        assert_eq!(b.status, JobStateView::Failed);
        assert_eq!(b.error.as_deref(), Some("no job spec supplied"));
        assert_eq!(view.status, BatchStatus::Failed);
        assert!(view.status.is_terminal());
    }

    #[tokio::test]
    async fn processing_is_recorded_before_subtasks_start() {
        let f = fixture();
        let id = new_batch_id();
        f.tracker.create_batch(id, "r", &["watch"]).await.unwrap();

        let report = f
            .executor
            .run(
                id,
                "r",
                vec![JobSpec::new("watch").with_subtask(ObserveOwnStatus {
                    tracker: f.tracker.clone(),
                    batch_id: id,
                })],
            )
            .await;

        let JobOutcome::Completed(payload) = &report.jobs["watch"] else {
            panic!("watch job should complete");
        };
        assert_eq!(payload.as_value()["seen"], json!("processing"));
    }

    #[tokio::test]
    async fn job_outside_the_batch_is_not_run() {
        let f = fixture();
        let id = new_batch_id();
        f.tracker.create_batch(id, "r", &["a"]).await.unwrap();

        let report = f
            .executor
            .run(
                id,
                "r",
                vec![
                    JobSpec::new("a").with_subtask(emit("k", json!(1))),
                    JobSpec::new("stray").with_subtask(emit("k", json!(2))),
                ],
            )
            .await;

        assert!(matches!(report.jobs["stray"], JobOutcome::Failed(_)));
        let record = f.durable.get("r").await.unwrap();
        assert!(!record.results.contains_key("stray"));
        let view = f.tracker.get_batch(id).await.unwrap().unwrap();
        assert_eq!(view.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn completed_outputs_become_the_batch_result() {
        let f = fixture();
        let id = new_batch_id();
        f.tracker.create_batch(id, "r", &["a", "b"]).await.unwrap();

        f.executor
            .run(
                id,
                "r",
                vec![
                    JobSpec::new("a").with_subtask(emit("text", json!("hi"))),
                    JobSpec::new("b").with_subtask(Fail),
                ],
            )
            .await;

        let view = f.tracker.get_batch(id).await.unwrap().unwrap();
        assert_eq!(
            view.result.unwrap().as_value(),
            &json!({ "a": { "text": "hi" } })
        );
    }

    #[tokio::test]
    async fn generation_proceeds_while_tracking_is_down() {
        let f = fixture();
        let id = new_batch_id();
        f.tracker.create_batch(id, "r", &["a"]).await.unwrap();
        f.store.set_available(false);

        let report = f
            .executor
            .run(id, "r", vec![JobSpec::new("a").with_subtask(emit("k", json!(1)))])
            .await;

        assert_eq!(report.completed_count(), 1);
        assert!(f.durable.get("r").await.unwrap().results.contains_key("a"));
    }

    #[tokio::test]
    async fn submitted_batch_is_pollable_to_completion() {
        let f = fixture();
        let ids = UlidGenerator::new(SystemClock);

        let batch_id = f
            .executor
            .submit(
                &ids,
                "scenario-9",
                vec![
                    JobSpec::new("script").with_subtask(emit("text", json!("..."))),
                    JobSpec::new("cover").with_subtask(emit("url", json!("img"))),
                ],
            )
            .await
            .unwrap();

        let view = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(view) = f.tracker.get_batch(batch_id).await.unwrap()
                    && view.status.is_terminal()
                    && view.result.is_some()
                {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(view.status, BatchStatus::Completed);
        assert_eq!(view.completed_jobs, 2);
        let durable = f.durable.find_by_batch_id(batch_id).await.unwrap().unwrap();
        assert_eq!(durable.record_id, "scenario-9");
    }
}
