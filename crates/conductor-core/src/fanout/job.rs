//! Job specs, sub-tasks, and the per-job workspace they write into.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

/// A sub-task (image render, line synthesis, ...) failed.
#[derive(Debug, Clone, Error)]
#[error("sub-task '{subtask}' failed: {message}")]
pub struct GenerationError {
    pub subtask: String,
    pub message: String,
}

impl GenerationError {
    pub fn new(subtask: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subtask: subtask.into(),
            message: message.into(),
        }
    }
}

/// One independent unit of generation work inside a job.
///
/// Sub-tasks of the same job run concurrently and share that job's
/// `JobWorkspace`; nothing is shared across jobs.
///
/// # 使用例
/// ```ignore
/// struct RenderCover;
///
/// #[async_trait]
/// impl SubTask for RenderCover {
///     fn name(&self) -> &str { "cover" }
///     async fn run(&self, ws: &JobWorkspace) -> Result<(), GenerationError> {
///         ws.insert("cover_url", json!("https://...")).await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait SubTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, workspace: &JobWorkspace) -> Result<(), GenerationError>;
}

/// Output being accumulated by one job's sub-tasks, behind one lock.
pub struct JobWorkspace {
    job_name: String,
    output: Mutex<Map<String, Value>>,
}

impl JobWorkspace {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            output: Mutex::new(Map::new()),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub async fn insert(&self, key: impl Into<String>, value: Value) {
        self.output.lock().await.insert(key.into(), value);
    }

    /// Mutate the output map under the lock (e.g. append to a shared array).
    pub async fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Map<String, Value>) -> R,
    {
        let mut output = self.output.lock().await;
        f(&mut output)
    }

    pub async fn snapshot(&self) -> Map<String, Value> {
        self.output.lock().await.clone()
    }
}

/// A named job and the sub-tasks that make it up.
pub struct JobSpec {
    pub(crate) name: String,
    pub(crate) subtasks: Vec<Arc<dyn SubTask>>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subtasks: Vec::new(),
        }
    }

    pub fn with_subtask<S: SubTask + 'static>(mut self, subtask: S) -> Self {
        self.subtasks.push(Arc::new(subtask));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn concurrent_writers_all_land() {
        let ws = Arc::new(JobWorkspace::new("audio"));
        let mut handles = Vec::new();
        for i in 0..8 {
            let ws = Arc::clone(&ws);
            handles.push(tokio::spawn(async move {
                ws.update(|out| {
                    let lines = out
                        .entry("lines")
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(items) = lines {
                        items.push(json!(i));
                    }
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let snapshot = ws.snapshot().await;
        assert_eq!(snapshot["lines"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn generation_error_names_the_subtask() {
        let err = GenerationError::new("tts-line-3", "voice not found");
        assert_eq!(err.to_string(), "sub-task 'tts-line-3' failed: voice not found");
    }
}
