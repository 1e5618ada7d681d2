//! Single-producer/single-consumer byte pipe over pooled blocks.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    error::ByteHubError,
    pool::{BytesPool, PooledBlock},
};

/// A rented block plus the number of bytes written into it.
struct Segment {
    block: PooledBlock,
    len: usize,
}

impl Segment {
    fn capacity_left(&self) -> usize {
        self.block.len() - self.len
    }
}

/// Single-producer/single-consumer byte pipe backed by rented blocks.
///
/// Bytes produced through the writer view are observed by the reader view
/// in order. The hub maintains the invariant
/// `remain_bytes() == written_bytes() - reader advance total` at all
/// times; [`ByteHub::reset`] returns every block to the pool and zeroes
/// both cursors, after which the hub behaves like a fresh one.
pub struct ByteHub {
    pool: Arc<BytesPool>,
    segments: VecDeque<Segment>,
    /// Read cursor into the front segment.
    read_offset: usize,
    written_bytes: u64,
    read_bytes: u64,
    /// Length of the span vended by the last `get_span`, zero if none.
    vended: usize,
    write_completed: bool,
}

impl ByteHub {
    /// Create an empty hub renting from `pool`.
    pub fn new(pool: Arc<BytesPool>) -> Self {
        Self {
            pool,
            segments: VecDeque::new(),
            read_offset: 0,
            written_bytes: 0,
            read_bytes: 0,
            vended: 0,
            write_completed: false,
        }
    }

    /// Writer view of this hub.
    pub fn writer(&mut self) -> HubWriter<'_> {
        HubWriter { hub: self }
    }

    /// Reader view of this hub.
    pub fn reader(&mut self) -> HubReader<'_> {
        HubReader { hub: self }
    }

    /// Total bytes ever written into this hub since the last reset.
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }

    /// Bytes written but not yet consumed by the reader.
    pub fn remain_bytes(&self) -> u64 {
        self.written_bytes - self.read_bytes
    }

    /// Return all blocks to the pool and zero both cursors.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.read_offset = 0;
        self.written_bytes = 0;
        self.read_bytes = 0;
        self.vended = 0;
        self.write_completed = false;
    }

    fn get_span(&mut self, hint: usize) -> Result<&mut [u8], ByteHubError> {
        if self.write_completed {
            return Err(ByteHubError::WriteAfterComplete);
        }

        let want = hint.clamp(1, self.pool.block_size());

        let needs_fresh_block = match self.segments.back() {
            Some(tail) => tail.capacity_left() < want,
            None => true,
        };
        if needs_fresh_block {
            self.segments.push_back(Segment { block: self.pool.rent(), len: 0 });
        }

        // The tail exists and has at least `want` writable bytes now.
        let Some(tail) = self.segments.back_mut() else {
            unreachable!("a segment was just pushed");
        };

        let start = tail.len;
        let span = &mut tail.block[start..];
        self.vended = span.len();

        Ok(span)
    }

    fn advance_write(&mut self, count: usize) -> Result<(), ByteHubError> {
        if count > self.vended {
            return Err(ByteHubError::AdvanceExceedsSpan { requested: count, vended: self.vended });
        }

        if let Some(tail) = self.segments.back_mut() {
            tail.len += count;
        }
        self.written_bytes += count as u64;
        self.vended = 0;

        Ok(())
    }

    fn advance_read(&mut self, count: usize) -> Result<(), ByteHubError> {
        let remaining = self.remain_bytes();
        if count as u64 > remaining {
            return Err(ByteHubError::AdvanceExceedsUnread { requested: count, remaining });
        }

        let mut left = count;
        while left > 0 {
            let Some(front) = self.segments.front() else {
                break;
            };
            let available = front.len - self.read_offset;
            let take = left.min(available);

            self.read_offset += take;
            self.read_bytes += take as u64;
            left -= take;

            // Fully consumed segments go back to the pool, except the tail,
            // which the writer may still be filling.
            if self.read_offset == front.len && self.segments.len() > 1 {
                self.segments.pop_front();
                self.read_offset = 0;
            }
        }

        Ok(())
    }
}

/// Writer view of a [`ByteHub`].
pub struct HubWriter<'a> {
    hub: &'a mut ByteHub,
}

impl HubWriter<'_> {
    /// Vend a writable span of at least `min(hint, block_size)` bytes.
    ///
    /// The returned span may be longer than asked for. Bytes only count as
    /// written once [`advance`](Self::advance) is called.
    pub fn get_span(&mut self, hint: usize) -> Result<&mut [u8], ByteHubError> {
        self.hub.get_span(hint)
    }

    /// Mark `count` bytes of the last vended span as written.
    pub fn advance(&mut self, count: usize) -> Result<(), ByteHubError> {
        self.hub.advance_write(count)
    }

    /// Copy `data` into the hub through span/advance cycles.
    pub fn put_slice(&mut self, data: &[u8]) -> Result<(), ByteHubError> {
        let mut rest = data;
        while !rest.is_empty() {
            let span = self.hub.get_span(rest.len())?;
            let take = span.len().min(rest.len());
            span[..take].copy_from_slice(&rest[..take]);
            self.hub.advance_write(take)?;
            rest = &rest[take..];
        }
        Ok(())
    }

    /// Total bytes written since the last reset.
    pub fn written_bytes(&self) -> u64 {
        self.hub.written_bytes
    }

    /// Finish the write side. Further `get_span` calls fail.
    pub fn complete(&mut self) {
        self.hub.write_completed = true;
    }
}

/// Reader view of a [`ByteHub`].
pub struct HubReader<'a> {
    hub: &'a mut ByteHub,
}

impl HubReader<'_> {
    /// The unread bytes as an ordered sequence of chunks.
    ///
    /// The sequence borrows the hub; consume it before advancing.
    pub fn sequence(&self) -> HubSequence<'_> {
        HubSequence {
            segments: &self.hub.segments,
            index: 0,
            offset: self.hub.read_offset,
        }
    }

    /// Consume `count` bytes from the front of the unread sequence.
    pub fn advance(&mut self, count: usize) -> Result<(), ByteHubError> {
        self.hub.advance_read(count)
    }

    /// Bytes written but not yet consumed.
    pub fn remain_bytes(&self) -> u64 {
        self.hub.remain_bytes()
    }

    /// Copy exactly `out.len()` bytes into `out` and advance past them.
    pub fn copy_to_slice(&mut self, out: &mut [u8]) -> Result<(), ByteHubError> {
        if (out.len() as u64) > self.hub.remain_bytes() {
            return Err(ByteHubError::AdvanceExceedsUnread {
                requested: out.len(),
                remaining: self.hub.remain_bytes(),
            });
        }

        let mut filled = 0;
        for chunk in self.sequence() {
            if filled == out.len() {
                break;
            }
            let take = chunk.len().min(out.len() - filled);
            out[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
        }

        self.hub.advance_read(out.len())
    }

    /// Collect all unread bytes into a vector and advance past them.
    pub fn to_vec(&mut self) -> Result<Vec<u8>, ByteHubError> {
        let mut out = vec![0u8; self.hub.remain_bytes() as usize];
        self.copy_to_slice(&mut out)?;
        Ok(out)
    }

    /// Finish the read side, discarding any unread bytes.
    pub fn complete(&mut self) -> Result<(), ByteHubError> {
        let remaining = self.hub.remain_bytes() as usize;
        self.hub.advance_read(remaining)
    }
}

/// Iterator over the unread chunks of a hub.
pub struct HubSequence<'a> {
    segments: &'a VecDeque<Segment>,
    index: usize,
    offset: usize,
}

impl<'a> Iterator for HubSequence<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.index < self.segments.len() {
            let segment = &self.segments[self.index];
            let chunk = &segment.block[self.offset..segment.len];
            self.index += 1;
            self.offset = 0;
            if !chunk.is_empty() {
                return Some(chunk);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn hub_with_block_size(block_size: usize) -> ByteHub {
        ByteHub::new(Arc::new(BytesPool::new(block_size)))
    }

    fn read_all(hub: &mut ByteHub) -> Vec<u8> {
        hub.reader().to_vec().unwrap()
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut hub = hub_with_block_size(8);

        hub.writer().put_slice(b"hello, hub").unwrap();
        assert_eq!(hub.written_bytes(), 10);
        assert_eq!(hub.remain_bytes(), 10);

        assert_eq!(read_all(&mut hub), b"hello, hub");
        assert_eq!(hub.remain_bytes(), 0);
        assert_eq!(hub.written_bytes(), 10);
    }

    #[test]
    fn remain_equals_written_minus_advanced() {
        let mut hub = hub_with_block_size(4);
        hub.writer().put_slice(&[0xAB; 11]).unwrap();

        hub.reader().advance(5).unwrap();
        assert_eq!(hub.remain_bytes(), 11 - 5);

        hub.writer().put_slice(&[0xCD; 3]).unwrap();
        assert_eq!(hub.remain_bytes(), 14 - 5);
    }

    #[test]
    fn sequence_preserves_order_across_blocks() {
        let mut hub = hub_with_block_size(3);
        let data: Vec<u8> = (0u8..10).collect();
        hub.writer().put_slice(&data).unwrap();

        let collected: Vec<u8> =
            hub.reader().sequence().flat_map(<[u8]>::to_vec).collect();
        assert_eq!(collected, data);
    }

    #[test]
    fn span_advance_cycle() {
        let mut hub = hub_with_block_size(16);
        let mut writer = hub.writer();

        let span = writer.get_span(4).unwrap();
        assert!(span.len() >= 4);
        span[..4].copy_from_slice(b"abcd");
        writer.advance(4).unwrap();

        assert_eq!(read_all(&mut hub), b"abcd");
    }

    #[test]
    fn advance_beyond_vended_span_fails() {
        let mut hub = hub_with_block_size(16);
        let mut writer = hub.writer();

        let span_len = writer.get_span(4).unwrap().len();
        let result = writer.advance(span_len + 1);
        assert!(matches!(result, Err(ByteHubError::AdvanceExceedsSpan { .. })));
    }

    #[test]
    fn get_span_after_complete_fails() {
        let mut hub = hub_with_block_size(16);
        let mut writer = hub.writer();
        writer.put_slice(b"x").unwrap();
        writer.complete();

        assert!(matches!(writer.get_span(1), Err(ByteHubError::WriteAfterComplete)));
    }

    #[test]
    fn reader_cannot_advance_past_written() {
        let mut hub = hub_with_block_size(16);
        hub.writer().put_slice(b"ab").unwrap();

        let result = hub.reader().advance(3);
        assert!(matches!(result, Err(ByteHubError::AdvanceExceedsUnread { .. })));
    }

    #[test]
    fn reset_behaves_like_a_fresh_hub() {
        let pool = Arc::new(BytesPool::new(8));
        let mut hub = ByteHub::new(Arc::clone(&pool));

        hub.writer().put_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        hub.reader().advance(4).unwrap();
        hub.reset();

        assert_eq!(hub.written_bytes(), 0);
        assert_eq!(hub.remain_bytes(), 0);
        // Blocks went back to the pool on reset.
        assert!(pool.pooled_block_count() >= 1);

        hub.writer().put_slice(b"again").unwrap();
        assert_eq!(read_all(&mut hub), b"again");
    }

    #[test]
    fn consumed_segments_return_to_pool_incrementally() {
        let pool = Arc::new(BytesPool::new(4));
        let mut hub = ByteHub::new(Arc::clone(&pool));

        hub.writer().put_slice(&[0u8; 12]).unwrap();
        assert_eq!(pool.pooled_block_count(), 0);

        hub.reader().advance(8).unwrap();
        assert!(pool.pooled_block_count() >= 1);
    }

    #[test]
    fn reader_complete_discards_remaining() {
        let mut hub = hub_with_block_size(8);
        hub.writer().put_slice(b"leftover").unwrap();
        hub.reader().complete().unwrap();
        assert_eq!(hub.remain_bytes(), 0);
    }

    proptest! {
        #[test]
        fn chunked_writes_read_back_identically(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16),
            block_size in 1usize..32,
        ) {
            let mut hub = hub_with_block_size(block_size);
            let mut expected = Vec::new();

            for chunk in &chunks {
                hub.writer().put_slice(chunk).unwrap();
                expected.extend_from_slice(chunk);
            }

            prop_assert_eq!(hub.written_bytes(), expected.len() as u64);
            prop_assert_eq!(read_all(&mut hub), expected);
        }

        #[test]
        fn interleaved_reads_observe_writer_order(
            parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..32), 1..8),
        ) {
            let mut hub = hub_with_block_size(7);
            let mut expected = Vec::new();
            let mut observed = Vec::new();

            for part in &parts {
                hub.writer().put_slice(part).unwrap();
                expected.extend_from_slice(part);

                // Drain roughly half of what is pending each round.
                let take = (hub.remain_bytes() / 2) as usize;
                let mut buf = vec![0u8; take];
                hub.reader().copy_to_slice(&mut buf).unwrap();
                observed.extend_from_slice(&buf);
            }

            observed.extend_from_slice(&hub.reader().to_vec().unwrap());
            prop_assert_eq!(observed, expected);
        }
    }
}
