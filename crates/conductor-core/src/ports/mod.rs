//! Ports - 抽象化レイヤー
//!
//! 外部コラボレーター（揮発 KV, 永続 DB）と時刻・ID 生成への入口。
//!
//! # 設計原則
//! - durable store が正本
//! - ephemeral store は進捗と返信のための共有スクラッチ（best-effort）

pub mod clock;
pub mod durable_store;
pub mod ephemeral_store;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::durable_store::{DurableError, DurableRecord, DurableStore};
pub use self::ephemeral_store::{EphemeralStore, StoreError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
