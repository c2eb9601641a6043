//! Runtime configuration shared by the tracker, reply channel and executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retention windows and key layout.
///
/// Missing fields fall back to `Default` when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Prefix for every ephemeral-store key this crate writes.
    pub key_prefix: String,

    /// How long batch and job records live in the ephemeral store.
    pub batch_ttl_secs: u64,

    /// How long an unconsumed reply lives in the ephemeral store.
    pub reply_ttl_secs: u64,

    /// Default bound for a reply consumer's blocking wait.
    pub consume_timeout_secs: u64,
}

impl ConductorConfig {
    pub fn batch_ttl(&self) -> Duration {
        Duration::from_secs(self.batch_ttl_secs)
    }

    pub fn reply_ttl(&self) -> Duration {
        Duration::from_secs(self.reply_ttl_secs)
    }

    pub fn consume_timeout(&self) -> Duration {
        Duration::from_secs(self.consume_timeout_secs)
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "conductor".to_string(),
            batch_ttl_secs: 24 * 60 * 60,
            reply_ttl_secs: 60,
            consume_timeout_secs: 30,
        }
    }
}
