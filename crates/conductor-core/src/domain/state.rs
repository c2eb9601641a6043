//! State - ジョブとバッチの状態
//!
//! 保存される状態（`JobState`）と観測される状態（`JobStateView`）を分ける。
//! 観測側にだけ `Unknown` がある: job_names に載っているのに store から消えたジョブ。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job state as written by the task executing that job.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    /// Is this a terminal state (no further transitions expected)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Job state as observed by a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStateView {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Named in the batch but its record is gone from the store.
    Unknown,
}

impl From<JobState> for JobStateView {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Pending => JobStateView::Pending,
            JobState::Processing => JobStateView::Processing,
            JobState::Completed => JobStateView::Completed,
            JobState::Failed => JobStateView::Failed,
        }
    }
}

/// Aggregate batch status, always derived from job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
