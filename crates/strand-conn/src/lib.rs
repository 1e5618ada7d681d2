//! Framed byte-stream connections over non-blocking transport caps.
//!
//! The pieces layer as follows:
//!
//! - [`Cap`]: the transport primitive, a non-blocking socket-like
//!   capability that moves bytes without ever blocking the caller.
//! - [`FramedConnection`]: length-prefixed framing over a cap. One
//!   outstanding frame per direction; applications stage frames with
//!   [`FramedConnection::enqueue`] and consume them with
//!   [`FramedConnection::dequeue`].
//! - [`ConnectionDispatcher`]: the shared pump. Connections make no
//!   progress on their own; a dispatcher calls their pump methods at a
//!   fixed cadence under per-direction byte budgets.
//! - [`MemoryCap`]: an in-memory duplex cap pair for tests and local
//!   wiring.

#![forbid(unsafe_code)]

mod cap;
mod connection;
mod dispatcher;
mod error;
mod memory;

pub use cap::{Cap, CapClosed};
pub use connection::{FramedConnection, FramedConnectionConfig};
pub use dispatcher::{ConnectionDispatcher, DispatcherConfig};
pub use error::ConnectionError;
pub use memory::MemoryCap;
