//! Error type for framed connections.

use strand_bytes::ByteHubError;
use thiserror::Error;

/// Errors raised by [`crate::FramedConnection`] operations.
///
/// A connection is not self-healing: once an operation reports
/// [`ConnectionError::Closed`] or [`ConnectionError::FrameTooLong`], the
/// connection stays terminally closed and every later operation fails the
/// same way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The underlying cap failed or the connection was closed.
    #[error("connection closed")]
    Closed,

    /// A frame exceeded the configured byte limit.
    #[error("frame of {length} bytes exceeds the {limit}-byte limit")]
    FrameTooLong {
        /// Length the frame declared or staged
        length: u64,
        /// Configured limit for this direction
        limit: u32,
    },

    /// The operation was cancelled before the mailbox was acquired.
    #[error("operation cancelled")]
    Cancelled,

    /// The connection was configured outside its supported bounds.
    #[error("invalid connection configuration: {reason}")]
    Config {
        /// What was wrong with the configuration
        reason: &'static str,
    },

    /// A frame action misused the hub it was handed.
    #[error(transparent)]
    Hub(#[from] ByteHubError),
}
