//! In-memory duplex cap pair.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::cap::{Cap, CapClosed};

struct Shared {
    /// Byte queue from side A to side B.
    a_to_b: Mutex<VecDeque<u8>>,
    /// Byte queue from side B to side A.
    b_to_a: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
    /// Upper bound on bytes moved per transfer call.
    transfer_limit: usize,
}

/// One side of an in-memory duplex byte pipe.
///
/// Built in connected pairs with [`MemoryCap::pair`]. Useful for tests
/// and for wiring two connections together inside one process. Closing
/// either side closes both. Clones share the underlying queues, which
/// lets a test keep a probe handle after handing the cap to a
/// connection.
#[derive(Clone)]
pub struct MemoryCap {
    shared: Arc<Shared>,
    /// True for the side created first.
    is_side_a: bool,
}

impl MemoryCap {
    /// Create a connected pair of caps.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_transfer_limit(usize::MAX)
    }

    /// Create a connected pair that moves at most `limit` bytes per
    /// `send`/`receive` call.
    ///
    /// Small limits force partial transfers, which exercises the framing
    /// state machines the way a congested socket would.
    pub fn pair_with_transfer_limit(limit: usize) -> (Self, Self) {
        let shared = Arc::new(Shared {
            a_to_b: Mutex::new(VecDeque::new()),
            b_to_a: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            transfer_limit: limit.max(1),
        });

        (
            Self { shared: Arc::clone(&shared), is_side_a: true },
            Self { shared, is_side_a: false },
        )
    }

    /// Close both sides of the pipe.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    /// Bytes queued toward this side but not yet received.
    pub fn pending_incoming(&self) -> usize {
        self.incoming().lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Snapshot of the bytes queued toward the peer, for wire-level
    /// assertions in tests.
    pub fn peek_outgoing(&self) -> Vec<u8> {
        let outgoing = self.outgoing().lock().unwrap_or_else(PoisonError::into_inner);
        outgoing.iter().copied().collect()
    }

    fn outgoing(&self) -> &Mutex<VecDeque<u8>> {
        if self.is_side_a { &self.shared.a_to_b } else { &self.shared.b_to_a }
    }

    fn incoming(&self) -> &Mutex<VecDeque<u8>> {
        if self.is_side_a { &self.shared.b_to_a } else { &self.shared.a_to_b }
    }
}

impl Cap for MemoryCap {
    fn can_send(&self) -> bool {
        true
    }

    fn can_receive(&self) -> bool {
        // Stay true once closed so the next receive surfaces the error.
        self.shared.closed.load(Ordering::Acquire) || self.pending_incoming() > 0
    }

    fn send(&self, buf: &[u8]) -> Result<usize, CapClosed> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(CapClosed);
        }

        let take = buf.len().min(self.shared.transfer_limit);
        let mut outgoing = self.outgoing().lock().unwrap_or_else(PoisonError::into_inner);
        outgoing.extend(&buf[..take]);
        Ok(take)
    }

    fn receive(&self, buf: &mut [u8]) -> Result<usize, CapClosed> {
        let mut incoming = self.incoming().lock().unwrap_or_else(PoisonError::into_inner);

        if incoming.is_empty() {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(CapClosed);
            }
            return Ok(0);
        }

        let take = buf.len().min(incoming.len()).min(self.shared.transfer_limit);
        for slot in buf.iter_mut().take(take) {
            let Some(byte) = incoming.pop_front() else {
                break;
            };
            *slot = byte;
        }
        Ok(take)
    }

    fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        MemoryCap::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_flow_both_ways() {
        let (a, b) = MemoryCap::pair();

        assert_eq!(a.send(b"ping").unwrap(), 4);
        let mut buf = [0u8; 8];
        assert_eq!(b.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");

        assert_eq!(b.send(b"pong").unwrap(), 4);
        assert_eq!(a.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"pong");
    }

    #[test]
    fn receive_without_data_returns_zero() {
        let (a, _b) = MemoryCap::pair();
        let mut buf = [0u8; 4];
        assert_eq!(a.receive(&mut buf).unwrap(), 0);
        assert!(!a.can_receive());
    }

    #[test]
    fn transfer_limit_caps_each_call() {
        let (a, b) = MemoryCap::pair_with_transfer_limit(3);

        assert_eq!(a.send(b"abcdef").unwrap(), 3);
        assert_eq!(a.send(b"def").unwrap(), 3);

        let mut buf = [0u8; 16];
        assert_eq!(b.receive(&mut buf).unwrap(), 3);
        assert_eq!(b.receive(&mut buf[3..]).unwrap(), 3);
        assert_eq!(&buf[..6], b"abcdef");
    }

    #[test]
    fn close_is_visible_to_both_sides() {
        let (a, b) = MemoryCap::pair();
        a.close();

        assert!(!a.is_connected());
        assert!(!b.is_connected());
        assert_eq!(b.send(b"x"), Err(CapClosed));

        let mut buf = [0u8; 1];
        assert_eq!(b.receive(&mut buf), Err(CapClosed));
    }

    #[test]
    fn queued_bytes_drain_before_close_error() {
        let (a, b) = MemoryCap::pair();
        a.send(b"last").unwrap();
        a.close();

        let mut buf = [0u8; 8];
        assert_eq!(b.receive(&mut buf).unwrap(), 4);
        assert_eq!(b.receive(&mut buf), Err(CapClosed));
    }
}
