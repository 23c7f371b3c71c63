//! Supervised worker lifecycle.

use crate::error::{RangeFeedError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, warn};

struct Inner {
    /// Dropped to signal quiescence; nothing is ever sent.
    quiesce_tx: Mutex<Option<Sender<()>>>,
    quiesce_rx: Receiver<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Mutex<Vec<ThreadId>>,
    /// Dropped by the stopping thread once every worker is joined.
    stopped_tx: Mutex<Option<Sender<()>>>,
    stopped_rx: Receiver<()>,
}

/// Runs named worker threads and stops them together.
///
/// `stop` closes the quiesce channel, which workers select on, and then
/// joins every worker. Clones share the same set of workers.
#[derive(Clone)]
pub struct Stopper {
    inner: Arc<Inner>,
}

impl Stopper {
    pub fn new() -> Self {
        let (quiesce_tx, quiesce_rx) = bounded(0);
        let (stopped_tx, stopped_rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                quiesce_tx: Mutex::new(Some(quiesce_tx)),
                quiesce_rx,
                workers: Mutex::new(Vec::new()),
                worker_ids: Mutex::new(Vec::new()),
                stopped_tx: Mutex::new(Some(stopped_tx)),
                stopped_rx,
            }),
        }
    }

    /// Channel that becomes disconnected once the stopper starts stopping.
    pub fn should_quiesce(&self) -> Receiver<()> {
        self.inner.quiesce_rx.clone()
    }

    pub fn is_quiescing(&self) -> bool {
        self.inner.quiesce_tx.lock().is_none()
    }

    /// Spawn a worker thread.
    ///
    /// Fails with `Quiescing` once `stop` has been called.
    pub fn run_worker<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // Holding the workers lock across the check keeps `stop` from
        // missing a worker spawned concurrently with it.
        let mut workers = self.inner.workers.lock();
        if self.is_quiescing() {
            return Err(RangeFeedError::Quiescing);
        }
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|e| RangeFeedError::custom(format!("failed to spawn {}: {}", name, e)))?;
        self.inner.worker_ids.lock().push(handle.thread().id());
        workers.push(handle);
        Ok(())
    }

    /// Signal quiescence and wait for every worker to exit.
    ///
    /// Safe to call concurrently and repeatedly: the first caller joins the
    /// workers and every other caller waits for it to finish. A worker that
    /// calls `stop` does not wait for itself or its siblings.
    pub fn stop(&self) {
        let (handles, joiner) = {
            let mut workers = self.inner.workers.lock();
            let joiner = self.inner.quiesce_tx.lock().take().is_some();
            if joiner {
                debug!("stopper quiescing");
            }
            (std::mem::take(&mut *workers), joiner)
        };

        let current = thread::current().id();
        if !joiner {
            if !self.inner.worker_ids.lock().contains(&current) {
                let _ = self.inner.stopped_rx.recv();
            }
            return;
        }

        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker panicked during shutdown");
            }
        }
        self.inner.stopped_tx.lock().take();
        debug!("stopper stopped");
    }
}

impl Default for Stopper {
    fn default() -> Self {
        Self::new()
    }
}
