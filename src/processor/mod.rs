//! The rangefeed processor.
//!
//! A single worker thread owns all mutable state: the registrations, the
//! intent queue and the resolved timestamp. Every public method talks to
//! it over channels, so the processor can be shared freely between threads
//! (wrap it in an `Arc`).
//!
//! Lifecycle: `new` builds an unstarted processor, `start` runs its loop on
//! a [`Stopper`], and `stop`/`stop_with_err` (or stopping the stopper) shut
//! it down, delivering one terminal error to every live registration.

mod config;

pub use config::Config;

use crate::error::{RangeFeedError, Result};
use crate::registration::{OutputWorker, Registration, RegistrationId, Registry};
use crate::resolved::ResolvedTimestamp;
use crate::span::Span;
use crate::stop::Stopper;
use crate::stream::{PushOutcome, Stream};
use crate::types::{LogicalOp, Timestamp};
use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Messages carried by the bounded event channel.
enum Event {
    Ops(Vec<LogicalOp>),
    ClosedTs(Timestamp),
    /// Barrier. `guard` is dropped once every earlier event is processed
    /// and, with `flush_outputs`, once every output worker has caught up.
    Sync {
        guard: Sender<()>,
        flush_outputs: bool,
    },
}

enum Lifecycle {
    Unstarted(Box<EventLoop>),
    Running,
    Stopped,
}

/// Receiving ends of the processor's channels, handed to the loop on start.
struct EventLoop {
    config: Config,
    event_rx: Receiver<Event>,
    reg_rx: Receiver<Registration>,
    len_rx: Receiver<Sender<usize>>,
    stop_rx: Receiver<RangeFeedError>,
    /// Dropped when the loop exits, closing the stopped channel.
    _stopped_tx: Sender<()>,
}

/// Fans out logical ops and resolved timestamps for one key range.
pub struct Processor {
    span: Span,
    registration_buffer_size: usize,
    next_id: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
    event_tx: Sender<Event>,
    reg_tx: Sender<Registration>,
    len_tx: Sender<Sender<usize>>,
    stop_tx: Sender<RangeFeedError>,
    stopped_rx: Receiver<()>,
}

impl Processor {
    /// Create a processor. The event loop does not run until `start`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = bounded(config.event_chan_cap);
        let (reg_tx, reg_rx) = bounded(0);
        let (len_tx, len_rx) = bounded(0);
        let (stop_tx, stop_rx) = bounded(0);
        let (stopped_tx, stopped_rx) = bounded(0);

        Ok(Self {
            span: config.span.clone(),
            registration_buffer_size: config.registration_buffer_size,
            next_id: AtomicU64::new(1),
            lifecycle: Mutex::new(Lifecycle::Unstarted(Box::new(EventLoop {
                config,
                event_rx,
                reg_rx,
                len_rx,
                stop_rx,
                _stopped_tx: stopped_tx,
            }))),
            event_tx,
            reg_tx,
            len_tx,
            stop_tx,
            stopped_rx,
        })
    }

    /// The key range this processor watches.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run the event loop as a worker of `stopper`.
    ///
    /// # Panics
    ///
    /// If the processor was already started or stopped.
    pub fn start(&self, stopper: &Stopper) -> Result<()> {
        let event_loop = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Running) {
                Lifecycle::Unstarted(event_loop) => event_loop,
                Lifecycle::Running => panic!("rangefeed processor started twice"),
                Lifecycle::Stopped => panic!("rangefeed processor started after stop"),
            }
        };

        let quiesce = stopper.should_quiesce();
        let loop_stopper = stopper.clone();
        let result = stopper.run_worker("rangefeed-processor", move || {
            event_loop.run(loop_stopper, quiesce)
        });
        if let Err(err) = &result {
            // The loop was dropped with the closure.
            *self.lifecycle.lock() = Lifecycle::Stopped;
            warn!(error = %err, "rangefeed processor could not start");
        }
        result
    }

    /// Subscribe `stream` to values in `span` at or above `start_ts`.
    ///
    /// Exactly one error is eventually sent on `err_tx` when the
    /// registration ends; it should have room for one message. On a stopped
    /// processor the error is `ProcessorClosed`.
    ///
    /// # Panics
    ///
    /// If the processor was never started.
    pub fn register(
        &self,
        span: Span,
        start_ts: Timestamp,
        stream: Arc<dyn Stream>,
        err_tx: Sender<RangeFeedError>,
    ) -> RegistrationId {
        if matches!(*self.lifecycle.lock(), Lifecycle::Unstarted(_)) {
            panic!("register called on a rangefeed processor that was never started");
        }
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let Some(clipped) = span.intersect(&self.span) else {
            let _ = err_tx.try_send(RangeFeedError::SpanOutsideRange(span.to_string()));
            return id;
        };

        // Events enqueued before this call must not reach the new registration.
        self.sync_loop();

        let registration = Registration::new(
            id,
            clipped,
            start_ts,
            stream,
            err_tx.clone(),
            self.registration_buffer_size,
        );
        let closed = select! {
            send(self.reg_tx, registration) -> res => res.is_err(),
            recv(self.stopped_rx) -> _ => true,
        };
        if closed {
            let _ = err_tx.try_send(RangeFeedError::ProcessorClosed);
        }
        id
    }

    /// Feed logical ops, in timestamp order, into the processor.
    pub fn consume_logical_ops(&self, ops: Vec<LogicalOp>) {
        if ops.is_empty() {
            return;
        }
        self.send_event(Event::Ops(ops));
    }

    /// Report that the range's closed timestamp reached `ts`.
    pub fn forward_closed_ts(&self, ts: Timestamp) {
        self.send_event(Event::ClosedTs(ts));
    }

    /// Number of live registrations; zero unless running.
    pub fn len(&self) -> usize {
        if !matches!(*self.lifecycle.lock(), Lifecycle::Running) {
            return 0;
        }
        let (reply_tx, reply_rx) = bounded(1);
        let sent = select! {
            send(self.len_tx, reply_tx) -> res => res.is_ok(),
            recv(self.stopped_rx) -> _ => false,
        };
        if !sent {
            return 0;
        }
        reply_rx.recv().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until every event enqueued so far has been processed and
    /// delivered to the registrations' streams.
    ///
    /// A registration whose buffer is full at the barrier is not waited on.
    pub fn sync(&self) {
        self.sync_with(true);
    }

    /// Block until every event enqueued so far has been processed.
    fn sync_loop(&self) {
        self.sync_with(false);
    }

    fn sync_with(&self, flush_outputs: bool) {
        if !matches!(*self.lifecycle.lock(), Lifecycle::Running) {
            return;
        }
        let (guard, done_rx) = bounded(0);
        self.send_event(Event::Sync {
            guard,
            flush_outputs,
        });
        // Disconnects once the loop and every output worker drop their guard.
        let _ = done_rx.recv();
    }

    /// Stop the processor, disconnecting registrations with `ProcessorStopped`.
    pub fn stop(&self) {
        self.stop_with_err(RangeFeedError::ProcessorStopped);
    }

    /// Stop the processor, delivering `err` to every live registration.
    ///
    /// Idempotent; returns once the event loop has exited.
    pub fn stop_with_err(&self, err: RangeFeedError) {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Unstarted(_) => {
                    *lifecycle = Lifecycle::Stopped;
                    info!(span = %self.span, "rangefeed processor stopped before start");
                    return;
                }
                Lifecycle::Stopped => return,
                Lifecycle::Running => {}
            }
        }

        // Let already enqueued events reach the registrations first.
        self.sync_loop();
        select! {
            send(self.stop_tx, err) -> _ => {},
            recv(self.stopped_rx) -> _ => {},
        }
        let _ = self.stopped_rx.recv();
        *self.lifecycle.lock() = Lifecycle::Stopped;
    }

    fn send_event(&self, event: Event) {
        select! {
            send(self.event_tx, event) -> _ => {},
            recv(self.stopped_rx) -> _ => {},
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        // Channels close with the processor and the loop winds down on its
        // own; nothing to wait for.
        if matches!(*self.lifecycle.get_mut(), Lifecycle::Running) {
            debug!(span = %self.span, "rangefeed processor dropped while running");
        }
    }
}

/// State owned by the running loop.
struct LoopState {
    config: Config,
    stopper: Stopper,
    registry: Registry,
    rts: ResolvedTimestamp,
    push_in_flight: Arc<AtomicBool>,
}

impl EventLoop {
    fn run(self, stopper: Stopper, quiesce: Receiver<()>) {
        let EventLoop {
            config,
            event_rx,
            reg_rx,
            len_rx,
            stop_rx,
            _stopped_tx,
        } = self;

        let check_streams = tick(config.check_streams_interval);
        let push_intents = if config.push_intents_enabled() {
            tick(config.push_intents_interval)
        } else {
            never()
        };

        info!(span = %config.span, "rangefeed processor started");
        let mut state = LoopState {
            config,
            stopper,
            registry: Registry::new(),
            rts: ResolvedTimestamp::new(),
            push_in_flight: Arc::new(AtomicBool::new(false)),
        };

        let err = loop {
            select! {
                recv(reg_rx) -> msg => match msg {
                    Ok(registration) => state.add_registration(registration),
                    Err(_) => break RangeFeedError::ProcessorStopped,
                },
                recv(len_rx) -> msg => match msg {
                    Ok(reply) => {
                        let _ = reply.send(state.registry.len());
                    }
                    Err(_) => break RangeFeedError::ProcessorStopped,
                },
                recv(event_rx) -> msg => match msg {
                    Ok(event) => state.handle_event(event),
                    Err(_) => break RangeFeedError::ProcessorStopped,
                },
                recv(check_streams) -> _ => state.registry.check_streams(),
                recv(push_intents) -> _ => state.push_old_intents(),
                recv(stop_rx) -> msg => break msg.unwrap_or(RangeFeedError::ProcessorStopped),
                recv(quiesce) -> _ => break RangeFeedError::Quiescing,
            }
        };

        state.registry.disconnect_all(err.clone());
        info!(span = %state.config.span, error = %err, "rangefeed processor stopped");
    }
}

impl LoopState {
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Ops(ops) => {
                for op in &ops {
                    self.consume_logical_op(op);
                }
            }
            Event::ClosedTs(ts) => {
                if let Some(resolved) = self.rts.forward_closed_ts(ts) {
                    self.registry.publish_checkpoint(resolved);
                }
            }
            Event::Sync {
                guard,
                flush_outputs,
            } => {
                if flush_outputs {
                    self.registry.flush(&guard);
                }
            }
        }
    }

    fn consume_logical_op(&mut self, op: &LogicalOp) {
        if let Some(value) = op.visible_value() {
            let resolved = self.rts.get();
            if !resolved.is_zero() && value.value.timestamp <= resolved {
                warn!(
                    key = %value.key,
                    ts = %value.value.timestamp,
                    resolved_ts = %resolved,
                    "value written at or below resolved timestamp"
                );
            }
            self.registry.publish_value(&value);
        }
        if let Some(resolved) = self.rts.consume_logical_op(op) {
            self.registry.publish_checkpoint(resolved);
        }
    }

    fn add_registration(&mut self, mut registration: Registration) {
        let id = registration.id;
        if let Some(worker) = registration.take_output_worker(self.config.catch_up.clone()) {
            if let Err(err) = self.spawn_output(worker) {
                registration.disconnect(err);
                return;
            }
        }
        debug!(registration = %id, span = %registration.span, start_ts = %registration.start_ts, "registration added");
        self.registry.insert(registration);
    }

    fn spawn_output(&self, worker: OutputWorker) -> Result<()> {
        let name = format!("rangefeed-output-{}", worker.id.0);
        self.stopper.run_worker(&name, move || worker.run())
    }

    /// Hand the oldest intent to the pusher once it is older than the
    /// configured age. At most one push runs at a time.
    fn push_old_intents(&mut self) {
        let Some(pusher) = self.config.txn_pusher.clone() else {
            return;
        };
        let Some((txn, ts)) = self.rts.intent_queue().oldest() else {
            return;
        };
        let age = i64::try_from(self.config.push_intents_age_threshold.as_nanos()).unwrap_or(i64::MAX);
        if ts >= self.config.clock.now().sub_nanos(age) {
            return;
        }
        if self.push_in_flight.swap(true, Ordering::SeqCst) {
            return;
        }

        let in_flight = Arc::clone(&self.push_in_flight);
        let result = self.stopper.run_worker("rangefeed-txn-push", move || {
            match pusher.push_txn(txn, ts) {
                Ok(PushOutcome::Resolved) => debug!(txn = %txn, ts = %ts, "pushed txn resolved"),
                Ok(PushOutcome::Pending) => debug!(txn = %txn, ts = %ts, "pushed txn still pending"),
                Err(err) => warn!(txn = %txn, ts = %ts, error = %err, "txn push failed"),
            }
            in_flight.store(false, Ordering::SeqCst);
        });
        if result.is_err() {
            self.push_in_flight.store(false, Ordering::SeqCst);
        }
    }
}
