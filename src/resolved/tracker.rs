//! Resolved timestamp computation.

use super::intent_queue::IntentQueue;
use crate::types::{LogicalOp, Timestamp};
use tracing::trace;

/// Derives the resolved timestamp of a range from its closed timestamp and
/// its unresolved intents.
///
/// The resolved timestamp is the closed timestamp, held back to just below
/// the oldest unresolved intent. It never decreases.
#[derive(Debug, Default)]
pub struct ResolvedTimestamp {
    closed_ts: Timestamp,
    resolved_ts: Timestamp,
    intent_queue: IntentQueue,
}

impl ResolvedTimestamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current resolved timestamp.
    pub fn get(&self) -> Timestamp {
        self.resolved_ts
    }

    /// Highest closed timestamp seen.
    pub fn closed_ts(&self) -> Timestamp {
        self.closed_ts
    }

    pub fn intent_queue(&self) -> &IntentQueue {
        &self.intent_queue
    }

    /// Forward the closed timestamp.
    ///
    /// Returns the new resolved timestamp if it advanced.
    pub fn forward_closed_ts(&mut self, ts: Timestamp) -> Option<Timestamp> {
        if !self.closed_ts.forward(ts) {
            return None;
        }
        self.recompute()
    }

    /// Apply a logical op to the intent queue.
    ///
    /// Returns the new resolved timestamp if it advanced.
    pub fn consume_logical_op(&mut self, op: &LogicalOp) -> Option<Timestamp> {
        match op {
            LogicalOp::WriteValue { .. } => return None,
            LogicalOp::WriteIntent { txn_id, timestamp } => {
                self.intent_queue.add(*txn_id, *timestamp);
            }
            LogicalOp::UpdateIntent { txn_id, timestamp } => {
                self.intent_queue.update(*txn_id, *timestamp, false);
            }
            LogicalOp::CommitIntent {
                txn_id, timestamp, ..
            } => {
                self.intent_queue.commit(*txn_id, *timestamp);
            }
            LogicalOp::AbortIntent { txn_id } => {
                self.intent_queue.remove(*txn_id);
            }
        }
        self.recompute()
    }

    fn recompute(&mut self) -> Option<Timestamp> {
        let mut candidate = self.closed_ts;
        if let Some(oldest) = self.intent_queue.oldest_timestamp() {
            candidate = candidate.min(oldest.prev());
        }
        if self.resolved_ts.forward(candidate) {
            trace!(resolved_ts = %self.resolved_ts, closed_ts = %self.closed_ts, "resolved timestamp advanced");
            Some(self.resolved_ts)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxnId;

    fn ts(wall: i64) -> Timestamp {
        Timestamp::wall(wall)
    }

    #[test]
    fn test_closed_ts_without_intents() {
        let mut rts = ResolvedTimestamp::new();
        assert_eq!(rts.get(), Timestamp::ZERO);

        assert_eq!(rts.forward_closed_ts(ts(5)), Some(ts(5)));
        assert_eq!(rts.forward_closed_ts(ts(5)), None);
        assert_eq!(rts.forward_closed_ts(ts(3)), None);
        assert_eq!(rts.closed_ts(), ts(5));
        assert_eq!(rts.get(), ts(5));
    }

    #[test]
    fn test_write_value_does_not_move_resolved() {
        let mut rts = ResolvedTimestamp::new();
        rts.forward_closed_ts(ts(5));
        let op = LogicalOp::write_value("a", ts(6), b"v".to_vec());
        assert_eq!(rts.consume_logical_op(&op), None);
        assert_eq!(rts.get(), ts(5));
    }

    #[test]
    fn test_held_back_by_intent() {
        let mut rts = ResolvedTimestamp::new();
        let txn = TxnId::new_v4();

        assert_eq!(rts.consume_logical_op(&LogicalOp::write_intent(txn, ts(10))), None);
        assert_eq!(rts.forward_closed_ts(ts(15)), Some(ts(9)));

        // Pushing the intent lets the resolved timestamp follow.
        assert_eq!(
            rts.consume_logical_op(&LogicalOp::update_intent(txn, ts(12))),
            Some(ts(11))
        );

        // Committing releases it up to the closed timestamp.
        assert_eq!(
            rts.consume_logical_op(&LogicalOp::commit_intent(txn, "e", ts(13), b"v".to_vec())),
            Some(ts(15))
        );
        assert!(rts.intent_queue().is_empty());
    }

    #[test]
    fn test_abort_releases_intent() {
        let mut rts = ResolvedTimestamp::new();
        let txn = TxnId::new_v4();
        rts.consume_logical_op(&LogicalOp::write_intent(txn, ts(3)));
        assert_eq!(rts.forward_closed_ts(ts(8)), Some(ts(2)));
        assert_eq!(rts.consume_logical_op(&LogicalOp::abort_intent(txn)), Some(ts(8)));
        assert_eq!(rts.intent_queue().len(), 0);
    }

    #[test]
    fn test_oldest_of_several_intents_wins() {
        let mut rts = ResolvedTimestamp::new();
        let (a, b) = (TxnId::new_v4(), TxnId::new_v4());
        rts.consume_logical_op(&LogicalOp::write_intent(a, ts(4)));
        rts.consume_logical_op(&LogicalOp::write_intent(b, ts(7)));
        assert_eq!(rts.forward_closed_ts(ts(20)), Some(ts(3)));

        assert_eq!(
            rts.consume_logical_op(&LogicalOp::commit_intent(a, "x", ts(4), b"v".to_vec())),
            Some(ts(6))
        );
        assert_eq!(rts.consume_logical_op(&LogicalOp::abort_intent(b)), Some(ts(20)));
    }

    #[test]
    fn test_never_decreases() {
        let mut rts = ResolvedTimestamp::new();
        rts.forward_closed_ts(ts(10));
        assert_eq!(rts.get(), ts(10));

        // An intent below the resolved timestamp cannot pull it back.
        let txn = TxnId::new_v4();
        assert_eq!(rts.consume_logical_op(&LogicalOp::write_intent(txn, ts(5))), None);
        assert_eq!(rts.get(), ts(10));
        assert_eq!(rts.forward_closed_ts(ts(12)), None);
        assert_eq!(rts.get(), ts(10));
    }
}
