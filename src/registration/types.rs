//! Per-subscriber registration state.

use super::output::OutputWorker;
use crate::error::{RangeFeedError, Result};
use crate::span::Span;
use crate::stream::{CatchUpScan, Stream};
use crate::types::{RangeFeedEvent, RangeFeedValue, Timestamp};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Unique identifier for a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(pub u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Items queued for a registration's output worker.
pub(crate) enum Output {
    Event(RangeFeedEvent),
    /// Dropped once everything queued before it has been delivered.
    Flush { _guard: Sender<()> },
}

/// Terminal error slot shared by the loop and the output worker.
pub(crate) struct Done {
    err_tx: Mutex<Option<Sender<RangeFeedError>>>,
}

impl Done {
    pub(crate) fn new(err_tx: Sender<RangeFeedError>) -> Self {
        Self {
            err_tx: Mutex::new(Some(err_tx)),
        }
    }

    /// Deliver the terminal error. Only the first call has any effect.
    pub(crate) fn disconnect(&self, err: RangeFeedError) -> bool {
        let Some(err_tx) = self.err_tx.lock().take() else {
            return false;
        };
        if let Err(TrySendError::Full(err)) = err_tx.try_send(err) {
            warn!(error = %err, "registration error channel full, dropping terminal error");
        }
        true
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        self.err_tx.lock().is_none()
    }
}

/// A subscriber's view of the range.
///
/// Owned by the processor loop once registered. Events are queued into a
/// bounded buffer drained by the registration's output worker; a full
/// buffer disconnects the registration instead of blocking the loop.
pub(crate) struct Registration {
    pub(crate) id: RegistrationId,
    pub(crate) span: Span,
    pub(crate) start_ts: Timestamp,
    stream: Arc<dyn Stream>,
    done: Arc<Done>,
    capacity: usize,
    buf: Option<Sender<Output>>,
    buf_rx: Option<Receiver<Output>>,
}

impl Registration {
    pub(crate) fn new(
        id: RegistrationId,
        span: Span,
        start_ts: Timestamp,
        stream: Arc<dyn Stream>,
        err_tx: Sender<RangeFeedError>,
        capacity: usize,
    ) -> Self {
        let (buf, buf_rx) = bounded(capacity);
        Self {
            id,
            span,
            start_ts,
            stream,
            done: Arc::new(Done::new(err_tx)),
            capacity,
            buf: Some(buf),
            buf_rx: Some(buf_rx),
        }
    }

    /// Whether a value belongs to this registration.
    pub(crate) fn matches_value(&self, value: &RangeFeedValue) -> bool {
        self.span.contains_key(&value.key) && value.value.timestamp >= self.start_ts
    }

    /// Whether a resolved timestamp is worth reporting to this registration.
    pub(crate) fn wants_checkpoint(&self, resolved_ts: Timestamp) -> bool {
        resolved_ts >= self.start_ts
    }

    /// Queue an event for delivery without blocking.
    pub(crate) fn publish(&self, event: RangeFeedEvent) -> Result<()> {
        let Some(buf) = &self.buf else {
            return Err(RangeFeedError::StreamClosed);
        };
        match buf.try_send(Output::Event(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RangeFeedError::BufferOverflow {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(RangeFeedError::StreamClosed),
        }
    }

    /// Queue a flush marker. Skipped if the buffer is full.
    pub(crate) fn flush(&self, guard: Sender<()>) {
        if let Some(buf) = &self.buf {
            let _ = buf.try_send(Output::Flush { _guard: guard });
        }
    }

    /// Deliver `err` to the subscriber and stop the output worker.
    ///
    /// Closes the stream so a worker blocked on a consumer that stopped
    /// reading gets unstuck.
    pub(crate) fn disconnect(&mut self, err: RangeFeedError) -> bool {
        self.buf = None;
        self.buf_rx = None;
        let first = self.done.disconnect(err);
        self.stream.close();
        first
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        self.done.is_disconnected()
    }

    pub(crate) fn stream_cancelled(&self) -> bool {
        self.stream.is_cancelled()
    }

    /// Hand the buffer's receiving side to a new output worker.
    pub(crate) fn take_output_worker(
        &mut self,
        catch_up: Option<Arc<dyn CatchUpScan>>,
    ) -> Option<OutputWorker> {
        let buf_rx = self.buf_rx.take()?;
        Some(OutputWorker {
            id: self.id,
            span: self.span.clone(),
            start_ts: self.start_ts,
            stream: Arc::clone(&self.stream),
            done: Arc::clone(&self.done),
            buf_rx,
            catch_up,
        })
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("span", &self.span)
            .field("start_ts", &self.start_ts)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}
