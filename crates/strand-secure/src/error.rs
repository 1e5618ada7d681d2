//! Error types for the secure connection layer.

use strand_bytes::ByteHubError;
use strand_conn::ConnectionError;
use thiserror::Error;

/// Errors raised while decoding handshake messages from the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The message ended before a field or value was complete.
    #[error("truncated message")]
    Truncated,

    /// A variable-length integer ran past its maximum width.
    #[error("varint overflow")]
    VarintOverflow,

    /// A declared length exceeds the bytes actually present.
    #[error("declared length {declared} exceeds remaining {remaining} bytes")]
    LengthOverrun {
        /// Length the field header declared
        declared: u64,
        /// Bytes actually remaining in the message
        remaining: usize,
    },

    /// A field id not defined for this message type.
    #[error("unknown field id {id}")]
    UnknownField {
        /// The offending field id
        id: u64,
    },

    /// A required field was absent from the record.
    #[error("missing required field `{name}`")]
    MissingField {
        /// Name of the absent field
        name: &'static str,
    },

    /// A field carried a value outside its domain.
    #[error("invalid value for field `{name}`")]
    InvalidValue {
        /// Name of the offending field
        name: &'static str,
    },
}

/// Errors raised by [`crate::SecureConnection`] operations.
///
/// Every failure is terminal: the connection records the error, closes,
/// and reports the recorded error from then on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecureConnectionError {
    /// `send`/`receive` called before the handshake completed.
    #[error("connection is not handshaked")]
    NotHandshaked,

    /// The peer requested a different authentication type.
    #[error("peer requested a different authentication type")]
    AuthTypeMismatch,

    /// The peers share no algorithm in one of the negotiated families.
    #[error("no common {family} algorithm")]
    NoCommonAlgorithm {
        /// Which algorithm family had an empty intersection
        family: &'static str,
    },

    /// The negotiated algorithm combination is not implemented.
    #[error("negotiated algorithm combination is not supported")]
    Unsupported,

    /// The peer's ephemeral public key is outside the freshness window.
    #[error("peer public key is outside the freshness window")]
    StalePublicKey,

    /// Password authentication found no shared password.
    #[error("no shared password")]
    PasswordMismatch,

    /// A record's declared running total disagrees with the local count.
    #[error("record sequence mismatch: peer declared {declared}, expected {expected}")]
    SequenceMismatch {
        /// Running total declared in the record header
        declared: u64,
        /// Running total maintained locally
        expected: u64,
    },

    /// A record's authentication tag failed verification.
    #[error("record authentication failed")]
    MacInvalid,

    /// A record violated the framing rules before any crypto ran.
    #[error("malformed record: {reason}")]
    Malformed {
        /// What was structurally wrong
        reason: &'static str,
    },

    /// A handshake message could not be decoded.
    #[error("malformed handshake message: {0}")]
    Message(#[from] WireError),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The underlying framed connection failed.
    #[error(transparent)]
    Connection(ConnectionError),

    /// A wrapped failure from inside the secure layer.
    #[error("secure connection failure: {0}")]
    Internal(String),
}

impl From<ConnectionError> for SecureConnectionError {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::Cancelled => Self::Cancelled,
            other => Self::Connection(other),
        }
    }
}

impl From<ByteHubError> for SecureConnectionError {
    fn from(error: ByteHubError) -> Self {
        Self::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_wrapped() {
        let error: SecureConnectionError = ConnectionError::Cancelled.into();
        assert_eq!(error, SecureConnectionError::Cancelled);
    }

    #[test]
    fn connection_closed_propagates_as_is() {
        let error: SecureConnectionError = ConnectionError::Closed.into();
        assert_eq!(error, SecureConnectionError::Connection(ConnectionError::Closed));
    }
}
