//! Pooled buffers and the byte hub.
//!
//! Two building blocks shared by the connection and coding layers:
//!
//! - [`BytesPool`]: a shared allocator of fixed-size byte blocks. Rentals
//!   are RAII guards; dropping a [`PooledBlock`] scrubs it and returns it
//!   to the pool, so secret-bearing buffers never linger with content.
//! - [`ByteHub`]: a single-producer/single-consumer byte pipe backed by a
//!   chain of rented blocks. The writer side vends writable spans and
//!   advances; the reader side exposes the unread bytes as an ordered
//!   sequence of chunks and advances.
//!
//! Hubs are not internally synchronized. The owning layer (a connection's
//! send or receive state) guards each hub with its own lock and hands out
//! short-lived [`HubWriter`]/[`HubReader`] views.

#![forbid(unsafe_code)]

mod error;
mod hub;
mod pool;

pub use error::ByteHubError;
pub use hub::{ByteHub, HubReader, HubSequence, HubWriter};
pub use pool::{BytesPool, PooledBlock};
