//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{BatchId, RequestId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は調整なしで一意な ID を生成
///
/// `Send + Sync` を要求（request handler から共有して使う）
pub trait IdGenerator: Send + Sync {
    fn generate_batch_id(&self) -> BatchId;

    fn generate_request_id(&self) -> RequestId;
}

/// UlidGenerator は Clock の時刻を timestamp 部分に使う ULID 生成器
///
/// FixedClock を渡すと timestamp 部分が決定的になる（ランダム部分は異なる）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_batch_id(&self) -> BatchId {
        BatchId::from(self.next_ulid())
    }

    fn generate_request_id(&self) -> RequestId {
        RequestId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_batch_id();
        let id2 = id_gen.generate_batch_id();

        assert_ne!(id1, id2);
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_request_id();
        let id2 = id_gen.generate_request_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }
}
