//! # Rangefeed
//!
//! Change streaming for a single key range. A [`Processor`] consumes the
//! logical operations applied to its range together with closed timestamp
//! updates, and fans out two kinds of events to registered subscribers:
//!
//! - **Values**: committed writes inside the subscriber's span
//! - **Checkpoints**: the resolved timestamp, below which no new values
//!   will ever appear
//!
//! ## Core Concepts
//!
//! - **Intent queue**: unresolved transactional writes, ordered by timestamp
//! - **Resolved timestamp**: the closed timestamp, held back by the oldest intent
//! - **Registrations**: a span, a start timestamp and a [`Stream`], each with
//!   a bounded buffer so one slow subscriber never stalls the others
//!
//! ## Example
//!
//! ```ignore
//! use rangefeed::{channel_stream, Config, LogicalOp, Processor, Span, Stopper, Timestamp};
//!
//! let stopper = Stopper::new();
//! let processor = Processor::new(Config::default().with_span(Span::new("a", "m")))?;
//! processor.start(&stopper)?;
//!
//! let (stream, events) = channel_stream(64);
//! let (err_tx, err_rx) = crossbeam_channel::bounded(1);
//! processor.register(Span::new("b", "d"), Timestamp::ZERO, stream, err_tx);
//!
//! processor.consume_logical_ops(vec![LogicalOp::write_value("c", Timestamp::wall(5), b"v".to_vec())]);
//! processor.forward_closed_ts(Timestamp::wall(10));
//!
//! for event in events.drain() {
//!     println!("{:?}", event);
//! }
//! processor.stop();
//! stopper.stop();
//! ```

pub mod clock;
pub mod error;
pub mod processor;
pub mod registration;
pub mod resolved;
pub mod span;
pub mod stop;
pub mod stream;
pub mod types;

// Re-exports
pub use clock::{Clock, HlcClock, ManualClock};
pub use error::{RangeFeedError, Result};
pub use processor::{Config, Processor};
pub use registration::RegistrationId;
pub use resolved::{IntentQueue, ResolvedTimestamp};
pub use span::Span;
pub use stop::Stopper;
pub use stream::{channel_stream, CatchUpScan, ChannelStream, PushOutcome, Stream, StreamReceiver, TxnPusher};
pub use types::*;
