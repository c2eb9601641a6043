//! InMemoryEphemeralStore - 開発用・テスト用の揮発 KV
//!
//! # 学習ポイント
//! - tokio の Mutex + Notify による blocking pop（ロックを跨いで await しない）
//! - `Notified::enable` で「チェック → 待機」の間の通知取りこぼしを防ぐ
//! - TTL はアクセス時に遅延評価（tokio::time::Instant なので paused clock で試験できる）

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::ports::{EphemeralStore, StoreError};

#[derive(Debug)]
enum Value {
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Drop the key if its TTL has elapsed, then hand back whatever is left.
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Operation(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

/// InMemoryEphemeralStore は Redis の hash / list / expire を模した実装
///
/// # 実装詳細
/// - HashMap<String, Entry> を 1 つの Mutex で保護
/// - rpush 時に Notify で blpop の待機者を起こす
/// - `set_available(false)` で障害を、`evict_field` でデータ欠損を再現できる
///
/// # 使用例
/// ```ignore
/// let store = InMemoryEphemeralStore::new();
/// store.rpush("reply:req-1", payload).await?;
/// let got = store.blpop("reply:req-1", Duration::from_secs(1)).await?;
/// ```
pub struct InMemoryEphemeralStore {
    entries: Mutex<HashMap<String, Entry>>,
    notify: Notify,
    available: AtomicBool,
}

impl InMemoryEphemeralStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Remove a single hash field, as if it had been lost.
    pub async fn evict_field(&self, key: &str, field: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(Entry {
            value: Value::Hash(hash),
            ..
        }) = live_entry(&mut entries, key)
        {
            hash.remove(field);
        }
    }

    /// Does the key exist (and is it not yet expired)?
    pub async fn exists(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        live_entry(&mut entries, key).is_some()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        }
    }

    async fn try_pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        let (value, drained) = match live_entry(&mut entries, key) {
            None => return Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let value = list.pop_front();
                (value, list.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };
        // 空になった list はキーごと消す（Redis と同じ）
        if drained {
            entries.remove(key);
        }
        Ok(value)
    }
}

impl Default for InMemoryEphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if live_entry(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                for (field, value) in fields {
                    hash.insert((*field).to_string(), value.clone());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn rpush(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.check_available()?;
        {
            let mut entries = self.entries.lock().await;
            if live_entry(&mut entries, key).is_none() {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(VecDeque::new()),
                        expires_at: None,
                    },
                );
            }
            match entries.get_mut(key) {
                Some(Entry {
                    value: Value::List(list),
                    ..
                }) => list.push_back(value),
                _ => return Err(wrong_type(key)),
            }
        }
        // 待機中の blpop を全員起こす（それぞれ自分のキーを再チェックする）
        self.notify.notify_waiters();
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(key).await? {
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if let Some(entry) = live_entry(&mut entries, key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
