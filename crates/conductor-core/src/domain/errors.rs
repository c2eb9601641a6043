//! Errors - クレート全体のエラー型
//!
//! 各モジュールは自分のエラー enum を持ち、ここでまとめる。
//! request handler 側は `ConductorError` だけを見ればよい。

use thiserror::Error;

use crate::fanout::GenerationError;
use crate::ports::{DurableError, StoreError};
use crate::reply::ReplyError;
use crate::tracker::TrackerError;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Durable(#[from] DurableError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Reply(#[from] ReplyError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl ConductorError {
    /// Should the caller answer with "try again later" rather than a hard failure?
    pub fn is_retryable(&self) -> bool {
        match self {
            ConductorError::Store(_) => true,
            ConductorError::Durable(e) => matches!(e, DurableError::Unavailable(_)),
            ConductorError::Tracker(e) => matches!(e, TrackerError::Store(_)),
            ConductorError::Reply(e) => e.is_retryable(),
            ConductorError::Generation(_) => false,
        }
    }
}
