//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryEphemeralStore**: 揮発 KV（hash / list / TTL / blocking pop）
//! - **InMemoryDurableStore**: 正本の代役
//!
//! 本番用の Redis / RDB 実装はこのクレートの外に置く。

pub mod inmem_durable;
pub mod inmem_ephemeral;

pub use self::inmem_durable::InMemoryDurableStore;
pub use self::inmem_ephemeral::InMemoryEphemeralStore;
