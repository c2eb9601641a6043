//! Reply Channel - バックグラウンド生成の結果を「ほぼ同期」で受け取る
//!
//! # フロー
//! 1. request handler が request_id を発行して即座に返す
//! 2. バックグラウンドタスクが AI 呼び出しを待ち、結果（失敗時は fallback）を push
//! 3. 呼び出し側は `consume` で timeout 付き blocking pop
//!
//! # 状態（request_id ごと）
//! - awaiting → delivered（producer が 1 回だけ書く）
//! - awaiting → expired（TTL 経過）
//! - pop は破壊的なので、2 回目の consume は expired と同じ振る舞い

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConductorConfig;
use crate::domain::RequestId;
use crate::ports::{EphemeralStore, StoreError};

/// What the caller eventually receives for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub ai_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl ReplyPayload {
    pub fn text(ai_text: impl Into<String>) -> Self {
        Self {
            ai_text: ai_text.into(),
            audio_url: None,
        }
    }

    pub fn with_audio(mut self, audio_url: impl Into<String>) -> Self {
        self.audio_url = Some(audio_url.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ReplyError {
    /// Nothing arrived within the wait bound; the producer may still deliver.
    #[error("no reply within the wait window, retry later")]
    Timeout,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("undecodable reply: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ReplyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReplyError::Timeout | ReplyError::Store(_))
    }
}

pub struct ReplyChannel {
    store: Arc<dyn EphemeralStore>,
    key_prefix: String,
    reply_ttl: Duration,
    consume_timeout: Duration,
}

impl ReplyChannel {
    pub fn new(store: Arc<dyn EphemeralStore>, config: &ConductorConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            reply_ttl: config.reply_ttl(),
            consume_timeout: config.consume_timeout(),
        }
    }

    fn key(&self, request_id: RequestId) -> String {
        format!("{}:reply:{request_id}", self.key_prefix)
    }

    /// The configured wait bound for consumers that have no opinion.
    pub fn default_timeout(&self) -> Duration {
        self.consume_timeout
    }

    /// Push the reply and start its TTL.
    pub async fn produce(
        &self,
        request_id: RequestId,
        payload: &ReplyPayload,
    ) -> Result<(), ReplyError> {
        let key = self.key(request_id);
        self.store.rpush(&key, serde_json::to_string(payload)?).await?;
        self.store.expire(&key, self.reply_ttl).await?;
        debug!(%request_id, "reply produced");
        Ok(())
    }

    /// Wait up to `timeout` for the reply, consuming it.
    pub async fn consume(
        &self,
        request_id: RequestId,
        timeout: Duration,
    ) -> Result<ReplyPayload, ReplyError> {
        let raw = self
            .store
            .blpop(&self.key(request_id), timeout)
            .await?
            .ok_or(ReplyError::Timeout)?;
        debug!(%request_id, "reply consumed");
        Ok(serde_json::from_str(&raw)?)
    }

    /// Run `work` on a detached task and deliver its outcome.
    ///
    /// A failed `work` is logged and replaced by `fallback`: the channel
    /// promises a reply, not a successful one. No handle is returned.
    pub fn spawn_producer<F, E>(
        self: &Arc<Self>,
        request_id: RequestId,
        work: F,
        fallback: ReplyPayload,
    ) where
        F: Future<Output = Result<ReplyPayload, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            let payload = match work.await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(%request_id, error = %e, "generation failed, replying with fallback");
                    fallback
                }
            };
            if let Err(e) = channel.produce(request_id, &payload).await {
                warn!(%request_id, error = %e, "reply could not be delivered");
            }
        });
    }
}
