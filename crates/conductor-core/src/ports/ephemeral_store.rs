//! EphemeralStore port - 揮発性の共有 KV（Redis 互換のプリミティブ）
//!
//! # 設計原則
//! - 正本ではない: expiry や再起動でデータが消えてもよい
//! - 操作はすべて単一キー・単一フィールド単位でアトミック
//! - 複数キーにまたがるトランザクションは使わない

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("ephemeral store unavailable: {0}")]
    Unavailable(String),

    #[error("ephemeral store operation failed: {0}")]
    Operation(String),
}

/// EphemeralStore は hash / list / TTL の最小集合
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから共有して使う）
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Set one or more fields of a hash, creating the key if needed.
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// All fields of a hash. A missing key is an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Append to the tail of a list, creating the key if needed.
    async fn rpush(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Pop the head of a list, waiting up to `timeout` for a value to arrive.
    /// `Ok(None)` means the wait elapsed.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError>;

    /// Expire the key after `ttl`. No-op on a missing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}
