//! DurableStore port - 正本（source of truth）
//!
//! 生成結果は owning business record（`record_id`）にマージされる。
//! batch_id はその record の metadata にだけ載り、
//! ephemeral 側が expire した後の「batch_id から record を引く」に使う。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BatchId, Payload};

#[derive(Debug, Clone, Error)]
pub enum DurableError {
    #[error("durable store unavailable: {0}")]
    Unavailable(String),

    #[error("durable store rejected write for record {record_id}: {reason}")]
    Rejected { record_id: String, reason: String },
}

/// Business record as held by the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub record_id: String,
    /// Opaque metadata; carries `batch_id`.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Merged job outputs, keyed by job name.
    pub results: BTreeMap<String, Payload>,
}

impl DurableRecord {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            metadata: serde_json::Map::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.metadata.get("batch_id").and_then(|v| v.as_str())
    }
}

/// DurableStore は生成結果の永続化先
///
/// # 設計原則
/// - `merge_job_result` の成功が durability boundary
/// - 失敗したら job は failed 扱い（生成自体が成功していても）
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create or update `record_id`, merging `payload` under `job_name`
    /// and recording `batch_id` in the record's metadata.
    async fn merge_job_result(
        &self,
        record_id: &str,
        batch_id: BatchId,
        job_name: &str,
        payload: &Payload,
    ) -> Result<(), DurableError>;

    async fn find_by_batch_id(&self, batch_id: BatchId)
    -> Result<Option<DurableRecord>, DurableError>;
}
