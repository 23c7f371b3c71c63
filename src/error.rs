//! Error types for the rangefeed processor.

use thiserror::Error;

/// Main error type for rangefeed operations.
///
/// Terminal errors are fanned out to every live registration when the
/// processor shuts down, so the type is `Clone`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RangeFeedError {
    #[error("rangefeed processor stopped")]
    ProcessorStopped,

    #[error("rangefeed processor closed")]
    ProcessorClosed,

    #[error("server is quiescing")]
    Quiescing,

    #[error("stream cancelled by consumer")]
    StreamCancelled,

    #[error("stream closed")]
    StreamClosed,

    #[error("registration buffer overflow (capacity {capacity})")]
    BufferOverflow { capacity: usize },

    #[error("span {0} does not overlap the processor range")]
    SpanOutsideRange(String),

    #[error("catch-up scan failed: {0}")]
    CatchUp(String),

    /// Returned by `Stream` implementations whose transport failed.
    #[error("stream send failed: {0}")]
    Send(String),

    /// Returned by `TxnPusher` implementations that could not push.
    #[error("txn push failed: {0}")]
    Push(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Custom(String),
}

impl RangeFeedError {
    /// Build a caller-defined terminal error, e.g. for `stop_with_err`.
    pub fn custom(msg: impl Into<String>) -> Self {
        RangeFeedError::Custom(msg.into())
    }
}

/// Result type for rangefeed operations.
pub type Result<T> = std::result::Result<T, RangeFeedError>;
