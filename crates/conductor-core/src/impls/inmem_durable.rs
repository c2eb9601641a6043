//! InMemoryDurableStore - テスト用の正本

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{BatchId, Payload};
use crate::ports::{DurableError, DurableRecord, DurableStore};

/// Records keyed by their own id; `find_by_batch_id` scans metadata.
#[derive(Default)]
pub struct InMemoryDurableStore {
    records: Mutex<HashMap<String, DurableRecord>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, record_id: &str) -> Option<DurableRecord> {
        self.records.lock().await.get(record_id).cloned()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn merge_job_result(
        &self,
        record_id: &str,
        batch_id: BatchId,
        job_name: &str,
        payload: &Payload,
    ) -> Result<(), DurableError> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(record_id.to_string())
            .or_insert_with(|| DurableRecord::new(record_id));
        record.metadata.insert(
            "batch_id".to_string(),
            serde_json::Value::String(batch_id.to_string()),
        );
        record
            .results
            .insert(job_name.to_string(), payload.clone());
        Ok(())
    }

    async fn find_by_batch_id(
        &self,
        batch_id: BatchId,
    ) -> Result<Option<DurableRecord>, DurableError> {
        let wanted = batch_id.to_string();
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|r| r.batch_id() == Some(wanted.as_str()))
            .cloned())
    }
}
