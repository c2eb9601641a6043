//! conductor-core
//!
//! Batch tracking, reply hand-off and fan-out execution for generation
//! pipelines built on an ephemeral KV store plus a durable record store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, batch, payload, errors）
//! - **ports**: 抽象化レイヤー（EphemeralStore, DurableStore, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryEphemeralStore など開発用）
//! - **tracker**: バッチ / ジョブ状態の記録と集計、結果の解決
//! - **reply**: request id 単位の一回限りの応答受け渡し
//! - **fanout**: ジョブと sub-task の並行実行
//! - **config**: TTL / timeout / key prefix

pub mod config;
pub mod domain;
pub mod fanout;
pub mod impls;
pub mod ports;
pub mod reply;
pub mod tracker;

pub use config::ConductorConfig;
pub use domain::{BatchId, BatchStatus, BatchView, ConductorError, JobState, Payload, RequestId};
pub use fanout::{
    FanoutExecutor, FanoutReport, GenerationError, JobOutcome, JobSpec, JobWorkspace, SubTask,
};
pub use reply::{ReplyChannel, ReplyError, ReplyPayload};
pub use tracker::{BatchTracker, ResolvedResult, ResultSource, TrackerError};
