//! Interfaces to the processor's external collaborators.
//!
//! - [`Stream`]: where a registration's events go (owned by the transport)
//! - [`CatchUpScan`]: historical values a new registration must see first
//! - [`TxnPusher`]: resolves transactions whose intents hold back the range
//!
//! [`ChannelStream`] is an in-process `Stream` backed by a bounded channel.

use crate::error::{RangeFeedError, Result};
use crate::span::Span;
use crate::types::{RangeFeedEvent, RangeFeedValue, Timestamp, TxnId};
use crossbeam_channel::{
    bounded, Receiver, RecvError, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sink for one registration's events.
///
/// `send` is only ever called from the registration's own output worker,
/// so it may block without stalling the processor. A blocked `send` must
/// return once `close` is called or the consumer goes away.
pub trait Stream: Send + Sync {
    fn send(&self, event: &RangeFeedEvent) -> Result<()>;

    /// Whether the consumer has gone away.
    fn is_cancelled(&self) -> bool;

    /// Called when the registration is torn down. Any pending or later
    /// `send` must fail promptly.
    fn close(&self);
}

/// Replays committed history for a new registration.
pub trait CatchUpScan: Send + Sync {
    /// Emit every value in `span` committed at or after `start_ts`.
    ///
    /// An error from `emit` must be returned unchanged.
    fn scan(
        &self,
        span: &Span,
        start_ts: Timestamp,
        emit: &mut dyn FnMut(RangeFeedValue) -> Result<()>,
    ) -> Result<()>;
}

/// Outcome of an attempt to push a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The transaction is finalized; its intents will be resolved.
    Resolved,
    /// The transaction is still running.
    Pending,
}

/// Pushes transactions whose intents are holding back the resolved timestamp.
pub trait TxnPusher: Send + Sync {
    fn push_txn(&self, txn: TxnId, ts: Timestamp) -> Result<PushOutcome>;
}

/// How often a blocked send re-checks for cancellation or close.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Shared {
    cancelled: AtomicBool,
    closed: AtomicBool,
}

/// A `Stream` that forwards events into a bounded channel.
pub struct ChannelStream {
    sender: Sender<RangeFeedEvent>,
    shared: Arc<Shared>,
}

/// Receiving side of a [`ChannelStream`].
///
/// Dropping the receiver cancels the stream.
pub struct StreamReceiver {
    receiver: Receiver<RangeFeedEvent>,
    shared: Arc<Shared>,
}

/// Create a channel-backed stream holding up to `capacity` undelivered events.
pub fn channel_stream(capacity: usize) -> (Arc<ChannelStream>, StreamReceiver) {
    let (sender, receiver) = bounded(capacity);
    let shared = Arc::new(Shared {
        cancelled: AtomicBool::new(false),
        closed: AtomicBool::new(false),
    });
    (
        Arc::new(ChannelStream {
            sender,
            shared: Arc::clone(&shared),
        }),
        StreamReceiver { receiver, shared },
    )
}

impl Stream for ChannelStream {
    fn send(&self, event: &RangeFeedEvent) -> Result<()> {
        self.check_open()?;
        let mut event = event.clone();
        loop {
            match self.sender.send_timeout(event, CANCEL_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    self.check_open()?;
                    event = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(RangeFeedError::StreamClosed),
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl ChannelStream {
    fn check_open(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RangeFeedError::StreamCancelled);
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(RangeFeedError::StreamClosed);
        }
        Ok(())
    }
}

impl StreamReceiver {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<RangeFeedEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<RangeFeedEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<RangeFeedEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<RangeFeedEvent> {
        self.receiver.try_iter().collect()
    }

    /// Tell the processor to drop this stream's registration.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.cancel();
    }
}
