//! Outstanding write intents ordered by timestamp.

use crate::types::{Timestamp, TxnId};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Tracked state for one transaction's intents within the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry {
    timestamp: Timestamp,
    ref_count: u32,
}

/// Queue of unresolved transactions, one entry per transaction.
///
/// Entries are indexed twice: by transaction for updates and by
/// `(timestamp, txn)` so the oldest intent is found in O(log n).
#[derive(Debug, Default)]
pub struct IntentQueue {
    entries: HashMap<TxnId, Entry>,
    by_timestamp: BTreeSet<(Timestamp, TxnId)>,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly written intent.
    ///
    /// If the transaction is already tracked the intent is an additional
    /// key, handled as `update(txn, ts, true)`.
    pub fn add(&mut self, txn: TxnId, ts: Timestamp) {
        if self.entries.contains_key(&txn) {
            self.update(txn, ts, true);
            return;
        }
        self.entries.insert(
            txn,
            Entry {
                timestamp: ts,
                ref_count: 1,
            },
        );
        self.by_timestamp.insert((ts, txn));
    }

    /// Forward a tracked transaction's timestamp.
    ///
    /// `additional_intent` marks a write to another key by the same
    /// transaction and bumps the reference count. Untracked transactions
    /// are added.
    pub fn update(&mut self, txn: TxnId, ts: Timestamp, additional_intent: bool) {
        let Some(entry) = self.entries.get_mut(&txn) else {
            self.add(txn, ts);
            return;
        };
        if additional_intent {
            entry.ref_count += 1;
        }
        let old = entry.timestamp;
        if entry.timestamp.forward(ts) {
            self.by_timestamp.remove(&(old, txn));
            self.by_timestamp.insert((entry.timestamp, txn));
        }
    }

    /// Release one intent of a transaction (commit or abort).
    ///
    /// Returns true if the transaction is no longer tracked.
    pub fn remove(&mut self, txn: TxnId) -> bool {
        let Some(entry) = self.entries.get_mut(&txn) else {
            debug!(txn = %txn, "resolving untracked intent, ignoring");
            return false;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return false;
        }
        let ts = entry.timestamp;
        self.entries.remove(&txn);
        self.by_timestamp.remove(&(ts, txn));
        true
    }

    /// Release one intent of a committed transaction.
    ///
    /// The commit timestamp is authoritative for any intents the
    /// transaction still holds in the range.
    pub fn commit(&mut self, txn: TxnId, ts: Timestamp) -> bool {
        if self.remove(txn) {
            return true;
        }
        let Some(entry) = self.entries.get_mut(&txn) else {
            return false;
        };
        if entry.timestamp != ts {
            if ts < entry.timestamp {
                debug!(txn = %txn, from = %entry.timestamp, to = %ts, "commit below pushed intent timestamp");
            }
            self.by_timestamp.remove(&(entry.timestamp, txn));
            entry.timestamp = ts;
            self.by_timestamp.insert((ts, txn));
        }
        false
    }

    /// The oldest tracked transaction and its timestamp.
    pub fn oldest(&self) -> Option<(TxnId, Timestamp)> {
        self.by_timestamp.first().map(|(ts, txn)| (*txn, *ts))
    }

    pub fn oldest_timestamp(&self) -> Option<Timestamp> {
        self.by_timestamp.first().map(|(ts, _)| *ts)
    }

    /// Timestamp currently tracked for `txn`.
    pub fn timestamp(&self, txn: TxnId) -> Option<Timestamp> {
        self.entries.get(&txn).map(|e| e.timestamp)
    }

    pub fn contains(&self, txn: TxnId) -> bool {
        self.entries.contains_key(&txn)
    }

    /// Number of tracked transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
