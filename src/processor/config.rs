//! Processor configuration.

use crate::clock::{Clock, HlcClock};
use crate::error::{RangeFeedError, Result};
use crate::span::Span;
use crate::stream::{CatchUpScan, TxnPusher};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Processor configuration, supplied once at construction.
#[derive(Clone)]
pub struct Config {
    /// Key range the processor watches.
    pub span: Span,

    /// Clock used to age intents before pushing them.
    pub clock: Arc<dyn Clock>,

    /// Capacity of the inbound event channel.
    /// Default: 1024
    pub event_chan_cap: usize,

    /// How often registrations' streams are checked for cancellation.
    /// Default: 1s
    pub check_streams_interval: Duration,

    /// How often old intents are considered for pushing (zero disables).
    /// Default: 250ms
    pub push_intents_interval: Duration,

    /// Intents older than this are pushed.
    /// Default: 10s
    pub push_intents_age_threshold: Duration,

    /// Max buffered events per registration before it is dropped.
    /// Default: 1000
    pub registration_buffer_size: usize,

    /// Resolves transactions holding back the resolved timestamp.
    pub txn_pusher: Option<Arc<dyn TxnPusher>>,

    /// Historical values replayed to new registrations.
    pub catch_up: Option<Arc<dyn CatchUpScan>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            span: Span::all(),
            clock: Arc::new(HlcClock::new()),
            event_chan_cap: 1024,
            check_streams_interval: Duration::from_secs(1),
            push_intents_interval: Duration::from_millis(250),
            push_intents_age_threshold: Duration::from_secs(10),
            registration_buffer_size: 1000,
            txn_pusher: None,
            catch_up: None,
        }
    }
}

impl Config {
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_txn_pusher(mut self, pusher: Arc<dyn TxnPusher>) -> Self {
        self.txn_pusher = Some(pusher);
        self
    }

    pub fn with_catch_up(mut self, scan: Arc<dyn CatchUpScan>) -> Self {
        self.catch_up = Some(scan);
        self
    }

    /// Whether intent pushing is active.
    pub fn push_intents_enabled(&self) -> bool {
        !self.push_intents_interval.is_zero() && self.txn_pusher.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.span.is_point() || !self.span.valid() {
            return Err(RangeFeedError::InvalidConfig(format!(
                "span {} must be a non-empty range",
                self.span
            )));
        }
        if self.check_streams_interval.is_zero() {
            return Err(RangeFeedError::InvalidConfig(
                "check_streams_interval must be positive".into(),
            ));
        }
        if self.registration_buffer_size == 0 {
            return Err(RangeFeedError::InvalidConfig(
                "registration_buffer_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("span", &self.span)
            .field("event_chan_cap", &self.event_chan_cap)
            .field("check_streams_interval", &self.check_streams_interval)
            .field("push_intents_interval", &self.push_intents_interval)
            .field("push_intents_age_threshold", &self.push_intents_age_threshold)
            .field("registration_buffer_size", &self.registration_buffer_size)
            .field("txn_pusher", &self.txn_pusher.is_some())
            .field("catch_up", &self.catch_up.is_some())
            .finish_non_exhaustive()
    }
}
