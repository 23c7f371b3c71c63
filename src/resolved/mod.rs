//! Resolved timestamp tracking.
//!
//! The resolved timestamp of a range is the timestamp below which no new
//! values can appear. It is derived from two inputs:
//! - the closed timestamp, supplied by the replication layer
//! - the set of unresolved intents, which may still commit at or above
//!   their provisional timestamps
//!
//! Both inputs are owned by the processor loop; nothing here is thread-safe.

mod intent_queue;
mod tracker;

pub use intent_queue::IntentQueue;
pub use tracker::ResolvedTimestamp;
