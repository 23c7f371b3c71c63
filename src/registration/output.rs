//! Delivery of a registration's buffered events to its stream.

use super::types::{Done, Output, RegistrationId};
use crate::error::RangeFeedError;
use crate::span::Span;
use crate::stream::{CatchUpScan, Stream};
use crate::types::{RangeFeedEvent, Timestamp};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::debug;

/// Drains one registration's buffer into its stream.
///
/// Runs on its own thread so a slow stream only ever fills its own buffer.
/// The catch-up scan, if any, runs first; live events queued meanwhile wait
/// in the buffer, so history and live data meet without a gap.
pub(crate) struct OutputWorker {
    pub(crate) id: RegistrationId,
    pub(crate) span: Span,
    pub(crate) start_ts: Timestamp,
    pub(crate) stream: Arc<dyn Stream>,
    pub(crate) done: Arc<Done>,
    pub(crate) buf_rx: Receiver<Output>,
    pub(crate) catch_up: Option<Arc<dyn CatchUpScan>>,
}

impl OutputWorker {
    pub(crate) fn run(self) {
        if let Err(err) = self.run_catch_up() {
            debug!(registration = %self.id, error = %err, "catch-up scan failed");
            self.done.disconnect(err);
            return;
        }

        for output in self.buf_rx.iter() {
            let event = match output {
                Output::Event(event) => event,
                Output::Flush { .. } => continue,
            };
            if self.done.is_disconnected() {
                break;
            }
            if let Err(err) = self.stream.send(&event) {
                debug!(registration = %self.id, error = %err, "stream send failed");
                self.done.disconnect(err);
                break;
            }
        }
        debug!(registration = %self.id, "output worker exiting");
    }

    fn run_catch_up(&self) -> Result<(), RangeFeedError> {
        let Some(scan) = &self.catch_up else {
            return Ok(());
        };
        let mut emitted = 0usize;
        scan.scan(&self.span, self.start_ts, &mut |value| {
            if self.done.is_disconnected() {
                return Err(RangeFeedError::StreamClosed);
            }
            emitted += 1;
            self.stream.send(&RangeFeedEvent::Value(value))
        })?;
        debug!(registration = %self.id, emitted, "catch-up scan complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::registration::types::Registration;
    use crate::stream::channel_stream;
    use crate::types::RangeFeedValue;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    struct FixedScan(Vec<RangeFeedValue>);

    impl CatchUpScan for FixedScan {
        fn scan(
            &self,
            span: &Span,
            start_ts: Timestamp,
            emit: &mut dyn FnMut(RangeFeedValue) -> Result<()>,
        ) -> Result<()> {
            for value in &self.0 {
                if span.contains_key(&value.key) && value.value.timestamp >= start_ts {
                    emit(value.clone())?;
                }
            }
            Ok(())
        }
    }

    struct FailingScan;

    impl CatchUpScan for FailingScan {
        fn scan(
            &self,
            _span: &Span,
            _start_ts: Timestamp,
            _emit: &mut dyn FnMut(RangeFeedValue) -> Result<()>,
        ) -> Result<()> {
            Err(RangeFeedError::CatchUp("iterator closed".into()))
        }
    }

    /// A transport whose connection is gone.
    struct BrokenStream;

    impl Stream for BrokenStream {
        fn send(&self, _event: &RangeFeedEvent) -> Result<()> {
            Err(RangeFeedError::Send("connection reset".into()))
        }

        fn is_cancelled(&self) -> bool {
            false
        }

        fn close(&self) {}
    }

    fn value(key: &str, wall: i64) -> RangeFeedValue {
        match RangeFeedEvent::value(key, b"old".to_vec(), Timestamp::wall(wall)) {
            RangeFeedEvent::Value(v) => v,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_catch_up_precedes_live_events() {
        let (stream, rx) = channel_stream(16);
        let (err_tx, _err_rx) = bounded(1);
        let mut reg = Registration::new(
            RegistrationId(1),
            Span::new("a", "m"),
            Timestamp::wall(2),
            stream,
            err_tx,
            8,
        );
        let live = RangeFeedEvent::value("c", b"new".to_vec(), Timestamp::wall(9));
        reg.publish(live.clone()).unwrap();

        let scan = FixedScan(vec![value("b", 1), value("b", 3), value("z", 4)]);
        let worker = reg.take_output_worker(Some(Arc::new(scan))).unwrap();
        let handle = std::thread::spawn(move || worker.run());

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first, RangeFeedEvent::Value(value("b", 3)));
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(second, live);

        reg.disconnect(RangeFeedError::ProcessorStopped);
        handle.join().unwrap();
    }

    #[test]
    fn test_catch_up_failure_disconnects() {
        let (stream, _rx) = channel_stream(16);
        let (err_tx, err_rx) = bounded(1);
        let mut reg = Registration::new(
            RegistrationId(2),
            Span::all(),
            Timestamp::ZERO,
            stream,
            err_tx,
            8,
        );
        let worker = reg.take_output_worker(Some(Arc::new(FailingScan))).unwrap();
        worker.run();

        assert_eq!(
            err_rx.try_recv(),
            Ok(RangeFeedError::CatchUp("iterator closed".into()))
        );
        assert!(reg.is_disconnected());
    }

    #[test]
    fn test_send_failure_disconnects() {
        let (stream, rx) = channel_stream(16);
        let (err_tx, err_rx) = bounded(1);
        let mut reg = Registration::new(
            RegistrationId(3),
            Span::all(),
            Timestamp::ZERO,
            stream,
            err_tx,
            8,
        );
        rx.cancel();
        reg.publish(RangeFeedEvent::value("c", b"v".to_vec(), Timestamp::wall(1)))
            .unwrap();
        let worker = reg.take_output_worker(None).unwrap();
        let handle = std::thread::spawn(move || worker.run());

        assert_eq!(
            err_rx.recv_timeout(Duration::from_secs(1)),
            Ok(RangeFeedError::StreamCancelled)
        );
        reg.disconnect(RangeFeedError::ProcessorStopped);
        handle.join().unwrap();
    }

    #[test]
    fn test_transport_error_reaches_subscriber() {
        let (err_tx, err_rx) = bounded(1);
        let mut reg = Registration::new(
            RegistrationId(4),
            Span::all(),
            Timestamp::ZERO,
            Arc::new(BrokenStream),
            err_tx,
            8,
        );
        reg.publish(RangeFeedEvent::value("c", b"v".to_vec(), Timestamp::wall(1)))
            .unwrap();
        let worker = reg.take_output_worker(None).unwrap();
        let handle = std::thread::spawn(move || worker.run());

        assert_eq!(
            err_rx.recv_timeout(Duration::from_secs(1)),
            Ok(RangeFeedError::Send("connection reset".into()))
        );
        assert!(reg.is_disconnected());
        reg.disconnect(RangeFeedError::ProcessorStopped);
        handle.join().unwrap();
    }
}
