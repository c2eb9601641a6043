//! Result lookup for pollers: ephemeral first, durable once the batch has expired.

use tracing::{debug, warn};

use super::{BatchTracker, TrackerError};
use crate::domain::{BatchId, ConductorError, Payload};
use crate::ports::DurableStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// Fresh result attached to the live batch.
    Ephemeral,
    /// Merged job outputs from the durable business record.
    Durable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResult {
    pub source: ResultSource,
    pub payload: Payload,
}

impl BatchTracker {
    /// Find the best available result for a batch.
    ///
    /// - live batch with a result -> that result
    /// - live batch without one -> `None` (still being produced)
    /// - expired, unreadable, or store down -> durable record found by batch id
    pub async fn resolve_result(
        &self,
        durable: &dyn DurableStore,
        batch_id: BatchId,
    ) -> Result<Option<ResolvedResult>, ConductorError> {
        match self.get_batch(batch_id).await {
            Ok(Some(view)) => {
                return Ok(view.result.map(|payload| ResolvedResult {
                    source: ResultSource::Ephemeral,
                    payload,
                }));
            }
            Ok(None) => debug!(%batch_id, "batch not in ephemeral store, trying durable"),
            Err(e @ (TrackerError::Store(_) | TrackerError::UnknownJobSet(_))) => {
                warn!(%batch_id, error = %e, "ephemeral read degraded, trying durable");
            }
            Err(e) => return Err(e.into()),
        }

        let Some(record) = durable.find_by_batch_id(batch_id).await? else {
            return Ok(None);
        };
        let payload = Payload::encode(&record.results).map_err(TrackerError::from)?;
        Ok(Some(ResolvedResult {
            source: ResultSource::Durable,
            payload,
        }))
    }
}
