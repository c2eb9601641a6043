//! Fan-out - バッチ内のジョブ、ジョブ内の sub-task を並行に駆動する
//!
//! # 二段構造
//! - バッチ: ジョブごとに 1 タスク（互いに独立、失敗は隔離）
//! - ジョブ: sub-task を並行実行し、join してから完了を記録
//!
//! 共有して書き換えるのはジョブ単位の `JobWorkspace` だけ（ジョブ間でロックを共有しない）。

pub mod executor;
pub mod job;

pub use self::executor::{FanoutExecutor, FanoutReport, JobOutcome};
pub use self::job::{GenerationError, JobSpec, JobWorkspace, SubTask};
