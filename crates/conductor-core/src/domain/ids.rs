//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type パターンで型ごとに区別します。
//! - `BatchId` と `RequestId` は同じ表現（128-bit ULID）を持つが混同できない
//! - Display は `batch-01H...` のようにプレフィックス付き
//! - `FromStr` はプレフィックス付き・なしの両方を受け付ける

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "batch-", "req-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時のサイズは Ulid と同じ。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{input}': {reason}")]
pub struct IdParseError {
    input: String,
    reason: String,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|e| IdParseError {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Batch のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Batch {}

impl IdMarker for Batch {
    fn prefix() -> &'static str {
        "batch-"
    }
}

/// Reply request のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Request {}

impl IdMarker for Request {
    fn prefix() -> &'static str {
        "req-"
    }
}

/// Identifier of a Batch (the caller-visible polling unit).
pub type BatchId = Id<Batch>;

/// Identifier of a reply-channel request.
pub type RequestId = Id<Request>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_type_prefix() {
        let batch = BatchId::from_ulid(Ulid::new());
        let request = RequestId::from_ulid(Ulid::new());

        assert!(batch.to_string().starts_with("batch-"));
        assert!(request.to_string().starts_with("req-"));
        // let _: BatchId = request; // <- does not compile
    }

    #[test]
    fn parses_with_and_without_prefix() {
        let ulid = Ulid::new();
        let id = BatchId::from_ulid(ulid);

        assert_eq!(id.to_string().parse::<BatchId>().unwrap(), id);
        assert_eq!(ulid.to_string().parse::<BatchId>().unwrap(), id);
    }

    #[test]
    fn rejects_garbage() {
        let err = "batch-not-a-ulid".parse::<BatchId>().unwrap_err();
        assert!(err.to_string().contains("batch-not-a-ulid"));
    }

    #[test]
    fn ids_can_be_serialized() {
        let id = RequestId::from_ulid(Ulid::new());
        let serialized = serde_json::to_string(&id).unwrap();
        let deserialized: RequestId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<BatchId>(), size_of::<Ulid>());
        assert_eq!(size_of::<RequestId>(), 16);
    }
}
