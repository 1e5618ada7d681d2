//! Error type for the Reed-Solomon coder.

use thiserror::Error;

/// Errors raised by [`crate::ReedSolomon`] construction, encode, and
/// decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodingError {
    /// Coder parameters outside `1 <= k <= n <= 256` or zero concurrency.
    #[error("invalid coder parameters: k={k}, n={n}, concurrency={concurrency}")]
    InvalidParameters {
        /// Requested data packet count
        k: usize,
        /// Requested total packet count
        n: usize,
        /// Requested worker count
        concurrency: usize,
    },

    /// A packet index is outside `0..n`.
    #[error("packet index {value} is out of range for n={n}")]
    IndexOutOfRange {
        /// The offending index value
        value: usize,
        /// Total packet count of the coder
        n: usize,
    },

    /// A packet or index array has the wrong length for this coder.
    #[error("expected {expected} {what}, got {actual}")]
    ArityMismatch {
        /// What was being counted
        what: &'static str,
        /// Expected element count
        expected: usize,
        /// Actual element count
        actual: usize,
    },

    /// A packet buffer does not match the declared packet length.
    #[error("packet {position} is {actual} bytes, expected {expected}")]
    PacketLengthMismatch {
        /// Position of the offending packet in its array
        position: usize,
        /// Declared packet length
        expected: usize,
        /// Actual buffer length
        actual: usize,
    },

    /// The decode index array names the same packet twice.
    #[error("duplicate packet index {index} in decode input")]
    DuplicateIndex {
        /// The duplicated index value
        index: usize,
    },

    /// Matrix inversion found no usable pivot.
    #[error("singular matrix: no usable pivot in column {column}")]
    SingularMatrix {
        /// Column at which pivot search failed
        column: usize,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("coding operation cancelled")]
    Cancelled,

    /// The bounded worker pool could not be built.
    #[error("failed to build coder worker pool: {0}")]
    WorkerPool(String),
}
