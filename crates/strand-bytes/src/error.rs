//! Error type for hub misuse.
//!
//! All variants are invalid-use errors: they indicate a caller driving the
//! hub outside its contract, never a runtime condition worth retrying.

use thiserror::Error;

/// Errors raised by [`crate::ByteHub`] writer and reader views.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ByteHubError {
    /// A writer advanced further than the span it was last vended.
    #[error("advance of {requested} bytes exceeds the last vended span of {vended} bytes")]
    AdvanceExceedsSpan {
        /// Bytes the caller tried to advance
        requested: usize,
        /// Length of the span vended by the last `get_span`
        vended: usize,
    },

    /// `get_span` was called after the writer completed the stream.
    #[error("hub written after complete")]
    WriteAfterComplete,

    /// A reader advanced past the bytes the writer has produced.
    #[error("advance of {requested} bytes exceeds the {remaining} unread bytes")]
    AdvanceExceedsUnread {
        /// Bytes the caller tried to advance
        requested: usize,
        /// Unread bytes available at the time of the call
        remaining: u64,
    },
}
