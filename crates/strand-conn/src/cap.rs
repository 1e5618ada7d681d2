//! The transport capability consumed by framed connections.

use thiserror::Error;

/// The transport endpoint is gone; no further transfer is possible.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transport capability closed")]
pub struct CapClosed;

/// A non-blocking transport capability.
///
/// A cap moves raw bytes and never blocks. `can_send` and `can_receive`
/// are hints: `true` means a transfer call is likely to make progress,
/// not that it will. Transfer calls return the byte count actually moved;
/// zero is a valid answer and means "no progress right now". A dead
/// endpoint surfaces as [`CapClosed`].
///
/// The connection layer provides all scheduling; implementations must
/// not block internally.
pub trait Cap: Send + Sync {
    /// Hint: would a `send` likely move bytes right now?
    fn can_send(&self) -> bool;

    /// Hint: would a `receive` likely move bytes right now?
    fn can_receive(&self) -> bool;

    /// Push up to `buf.len()` bytes into the transport.
    ///
    /// Returns the number of bytes accepted, possibly zero.
    fn send(&self, buf: &[u8]) -> Result<usize, CapClosed>;

    /// Pull up to `buf.len()` bytes from the transport into `buf`.
    ///
    /// Returns the number of bytes written into `buf`, possibly zero.
    fn receive(&self, buf: &mut [u8]) -> Result<usize, CapClosed>;

    /// Whether the transport endpoint is still up.
    fn is_connected(&self) -> bool;

    /// Tear the transport down. Later transfer calls fail with
    /// [`CapClosed`] on both endpoints.
    fn close(&self);
}
