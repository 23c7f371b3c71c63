//! Registrations: per-subscriber state owned by the processor.
//!
//! A registration pairs a key span and start timestamp with a [`Stream`].
//! The processor loop publishes matching events into the registration's
//! bounded buffer; a dedicated output worker drains the buffer into the
//! stream, after first running the catch-up scan.
//!
//! Registrations are dropped, with exactly one error delivered to their
//! error channel, when:
//! - their stream is cancelled
//! - sending to their stream fails
//! - their buffer overflows (slow consumer)
//! - the processor stops
//!
//! [`Stream`]: crate::stream::Stream

mod output;
mod registry;
mod types;

pub(crate) use output::OutputWorker;
pub(crate) use registry::Registry;
pub(crate) use types::Registration;
pub use types::RegistrationId;
