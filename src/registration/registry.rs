//! The set of live registrations and event fan-out.

use super::types::{Registration, RegistrationId};
use crate::error::RangeFeedError;
use crate::types::{RangeFeedEvent, RangeFeedValue, Timestamp};
use crossbeam_channel::Sender;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Registrations owned by the processor loop.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    registrations: BTreeMap<RegistrationId, Registration>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }

    pub(crate) fn insert(&mut self, registration: Registration) {
        self.registrations.insert(registration.id, registration);
    }

    /// Send a value to every registration it belongs to.
    pub(crate) fn publish_value(&mut self, value: &RangeFeedValue) {
        self.broadcast(
            |reg| reg.matches_value(value),
            |_| RangeFeedEvent::Value(value.clone()),
        );
    }

    /// Send a checkpoint, clipped to each registration's span.
    pub(crate) fn publish_checkpoint(&mut self, resolved_ts: Timestamp) {
        self.broadcast(
            |reg| reg.wants_checkpoint(resolved_ts),
            |reg| RangeFeedEvent::checkpoint(reg.span.clone(), resolved_ts),
        );
    }

    /// Internal broadcast helper. Disconnects registrations that fail to
    /// accept the event.
    fn broadcast<F, E>(&mut self, filter: F, event: E)
    where
        F: Fn(&Registration) -> bool,
        E: Fn(&Registration) -> RangeFeedEvent,
    {
        let mut failed = Vec::new();
        for (id, reg) in self.registrations.iter() {
            if reg.is_disconnected() {
                failed.push((*id, None));
                continue;
            }
            if !filter(reg) {
                continue;
            }
            if let Err(err) = reg.publish(event(reg)) {
                failed.push((*id, Some(err)));
            }
        }

        for (id, err) in failed {
            if let Some(mut reg) = self.registrations.remove(&id) {
                match err {
                    Some(err) => {
                        if matches!(err, RangeFeedError::BufferOverflow { .. }) {
                            warn!(registration = %id, span = %reg.span, "dropping slow registration");
                        }
                        reg.disconnect(err);
                    }
                    None => {
                        reg.disconnect(RangeFeedError::StreamClosed);
                    }
                }
                debug!(registration = %id, "registration removed");
            }
        }
    }

    /// Drop registrations whose stream was cancelled or whose output worker
    /// already disconnected them.
    pub(crate) fn check_streams(&mut self) {
        let mut removed = Vec::new();
        for (id, reg) in self.registrations.iter_mut() {
            if reg.is_disconnected() {
                removed.push(*id);
            } else if reg.stream_cancelled() {
                reg.disconnect(RangeFeedError::StreamCancelled);
                removed.push(*id);
            }
        }
        for id in removed {
            if let Some(mut reg) = self.registrations.remove(&id) {
                reg.disconnect(RangeFeedError::StreamClosed);
                debug!(registration = %id, "removed unresponsive registration");
            }
        }
    }

    /// Queue a flush marker behind everything already buffered.
    pub(crate) fn flush(&self, guard: &Sender<()>) {
        for reg in self.registrations.values() {
            reg.flush(guard.clone());
        }
    }

    /// Disconnect and remove every registration.
    pub(crate) fn disconnect_all(&mut self, err: RangeFeedError) {
        let count = self.registrations.len();
        for (_, mut reg) in std::mem::take(&mut self.registrations) {
            reg.disconnect(err.clone());
        }
        if count > 0 {
            debug!(count, error = %err, "disconnected all registrations");
        }
    }
}
