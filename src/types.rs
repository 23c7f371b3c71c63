//! Core types for the rangefeed.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An opaque, lexicographically ordered key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Key(pub Vec<u8>);

/// The smallest possible key.
pub const KEY_MIN: &[u8] = &[];

/// A key greater than every user key.
pub const KEY_MAX: &[u8] = &[0xff, 0xff];

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    pub fn min() -> Self {
        Key(KEY_MIN.to_vec())
    }

    pub fn max() -> Self {
        Key(KEY_MAX.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key(b)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.as_slice() == KEY_MAX {
            return write!(f, "/Max");
        }
        if self.0.is_empty() {
            return write!(f, "/Min");
        }
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            write!(f, "{:?}", String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "0x{}", hex::encode(&self.0))
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

/// Hybrid logical clock timestamp.
///
/// Ordered by wall time, then logical counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp {
    /// Nanoseconds since the Unix epoch.
    pub wall_time: i64,
    /// Counter distinguishing events within the same wall time.
    pub logical: i32,
}

impl Timestamp {
    /// The zero timestamp.
    pub const ZERO: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    /// Timestamp with only a wall time component.
    pub const fn wall(wall_time: i64) -> Self {
        Self {
            wall_time,
            logical: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// The next timestamp after this one.
    pub fn next(self) -> Self {
        if self.logical == i32::MAX {
            Timestamp::wall(self.wall_time + 1)
        } else {
            Timestamp::new(self.wall_time, self.logical + 1)
        }
    }

    /// A timestamp earlier than this one.
    ///
    /// Subtracts a logical tick when possible, otherwise a nanosecond of
    /// wall time with the logical counter floored to zero. The zero
    /// timestamp has no predecessor and is returned unchanged.
    pub fn prev(self) -> Self {
        if self.logical > 0 {
            Timestamp::new(self.wall_time, self.logical - 1)
        } else if self.wall_time > 0 {
            Timestamp::wall(self.wall_time - 1)
        } else {
            self
        }
    }

    /// Raise this timestamp to `other` if `other` is later.
    ///
    /// Returns true if the timestamp moved.
    pub fn forward(&mut self, other: Timestamp) -> bool {
        if other > *self {
            *self = other;
            true
        } else {
            false
        }
    }

    /// Subtract a wall time duration, saturating at zero.
    pub fn sub_nanos(self, nanos: i64) -> Self {
        Timestamp::new(self.wall_time.saturating_sub(nanos).max(0), self.logical)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({},{})", self.wall_time, self.logical)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09},{}",
            self.wall_time / 1_000_000_000,
            self.wall_time % 1_000_000_000,
            self.logical
        )
    }
}

/// Unique identifier for a transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub Uuid);

impl TxnId {
    /// Generate a random transaction ID.
    pub fn new_v4() -> Self {
        TxnId(Uuid::new_v4())
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", &self.0.simple().to_string()[..8])
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A versioned value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub raw_bytes: Vec<u8>,
    pub timestamp: Timestamp,
}

/// A logical mutation applied to the range by the storage engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogicalOp {
    /// A committed, non-transactional write.
    WriteValue {
        key: Key,
        timestamp: Timestamp,
        value: Vec<u8>,
    },

    /// A transaction wrote an intent.
    WriteIntent { txn_id: TxnId, timestamp: Timestamp },

    /// A transaction's provisional commit timestamp moved forward.
    UpdateIntent { txn_id: TxnId, timestamp: Timestamp },

    /// An intent was committed and is now a visible value.
    CommitIntent {
        txn_id: TxnId,
        key: Key,
        timestamp: Timestamp,
        value: Vec<u8>,
    },

    /// An intent was discarded.
    AbortIntent { txn_id: TxnId },
}

impl LogicalOp {
    pub fn write_value(key: impl Into<Key>, timestamp: Timestamp, value: impl Into<Vec<u8>>) -> Self {
        LogicalOp::WriteValue {
            key: key.into(),
            timestamp,
            value: value.into(),
        }
    }

    pub fn write_intent(txn_id: TxnId, timestamp: Timestamp) -> Self {
        LogicalOp::WriteIntent { txn_id, timestamp }
    }

    pub fn update_intent(txn_id: TxnId, timestamp: Timestamp) -> Self {
        LogicalOp::UpdateIntent { txn_id, timestamp }
    }

    pub fn commit_intent(
        txn_id: TxnId,
        key: impl Into<Key>,
        timestamp: Timestamp,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        LogicalOp::CommitIntent {
            txn_id,
            key: key.into(),
            timestamp,
            value: value.into(),
        }
    }

    pub fn abort_intent(txn_id: TxnId) -> Self {
        LogicalOp::AbortIntent { txn_id }
    }

    /// The value this op makes visible, if any.
    pub fn visible_value(&self) -> Option<RangeFeedValue> {
        match self {
            LogicalOp::WriteValue {
                key,
                timestamp,
                value,
            }
            | LogicalOp::CommitIntent {
                key,
                timestamp,
                value,
                ..
            } => Some(RangeFeedValue {
                key: key.clone(),
                value: Value {
                    raw_bytes: value.clone(),
                    timestamp: *timestamp,
                },
            }),
            _ => None,
        }
    }
}

/// A value emitted to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFeedValue {
    pub key: Key,
    pub value: Value,
}

/// Notification that every value in `span` up to `resolved_ts` has been emitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFeedCheckpoint {
    pub span: Span,
    pub resolved_ts: Timestamp,
}

/// Events delivered to a registration's stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RangeFeedEvent {
    /// A committed value inside the registration's span.
    Value(RangeFeedValue),

    /// The resolved timestamp for the registration's span advanced.
    Checkpoint(RangeFeedCheckpoint),
}

impl RangeFeedEvent {
    pub fn value(key: impl Into<Key>, raw_bytes: impl Into<Vec<u8>>, timestamp: Timestamp) -> Self {
        RangeFeedEvent::Value(RangeFeedValue {
            key: key.into(),
            value: Value {
                raw_bytes: raw_bytes.into(),
                timestamp,
            },
        })
    }

    pub fn checkpoint(span: Span, resolved_ts: Timestamp) -> Self {
        RangeFeedEvent::Checkpoint(RangeFeedCheckpoint { span, resolved_ts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_prev_floors_logical() {
        assert_eq!(Timestamp::wall(10).prev(), Timestamp::wall(9));
        assert_eq!(Timestamp::new(10, 3).prev(), Timestamp::new(10, 2));
        assert_eq!(Timestamp::ZERO.prev(), Timestamp::ZERO);
    }

    #[test]
    fn test_timestamp_next_and_ordering() {
        assert_eq!(Timestamp::wall(5).next(), Timestamp::new(5, 1));
        assert_eq!(Timestamp::new(5, i32::MAX).next(), Timestamp::wall(6));
        assert!(Timestamp::new(5, 9) < Timestamp::wall(6));
    }

    #[test]
    fn test_timestamp_forward() {
        let mut ts = Timestamp::wall(5);
        assert!(!ts.forward(Timestamp::wall(3)));
        assert_eq!(ts, Timestamp::wall(5));
        assert!(ts.forward(Timestamp::new(5, 1)));
        assert_eq!(ts, Timestamp::new(5, 1));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(Key::from("abc").to_string(), "\"abc\"");
        assert_eq!(Key::new(vec![0x00, 0x01]).to_string(), "0x0001");
        assert_eq!(Key::min().to_string(), "/Min");
        assert_eq!(Key::max().to_string(), "/Max");
    }

    #[test]
    fn test_visible_value() {
        let txn = TxnId::new_v4();
        assert!(LogicalOp::write_intent(txn, Timestamp::wall(1))
            .visible_value()
            .is_none());
        assert!(LogicalOp::abort_intent(txn).visible_value().is_none());

        let value = LogicalOp::commit_intent(txn, "k", Timestamp::wall(4), b"v".to_vec())
            .visible_value()
            .unwrap();
        assert_eq!(value.key, Key::from("k"));
        assert_eq!(value.value.timestamp, Timestamp::wall(4));
        assert_eq!(value.value.raw_bytes, b"v".to_vec());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = RangeFeedEvent::checkpoint(Span::new("a", "m"), Timestamp::wall(5));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "checkpoint");
        assert_eq!(json["resolved_ts"]["wall_time"], 5);

        let decoded: RangeFeedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, event);
    }
}
