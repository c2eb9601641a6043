//! Domain model (IDs, states, batch/job records, payloads, errors).

pub mod batch;
pub mod errors;
pub mod ids;
pub mod payload;
pub mod state;

pub use self::batch::{Aggregate, BatchView, JobRecord, JobView, derive_status};
pub use self::errors::ConductorError;
pub use self::ids::{BatchId, IdParseError, RequestId};
pub use self::payload::Payload;
pub use self::state::{BatchStatus, JobState, JobStateView};
