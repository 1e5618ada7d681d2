//! Shared pool of fixed-size byte blocks.

use std::sync::{Arc, Mutex};

use zeroize::Zeroize;

/// A shared, reentrant allocator of fixed-size byte blocks.
///
/// Blocks are rented with [`BytesPool::rent`] and returned automatically
/// when the [`PooledBlock`] guard drops. Returned blocks are zeroed before
/// they re-enter the free list, so a block that carried key material or
/// plaintext does not leak it to the next renter.
///
/// Rentals are always exactly `block_size` bytes, which may be more than a
/// caller asked for; callers track their logical length separately.
pub struct BytesPool {
    block_size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BytesPool {
    /// Default block size used by [`BytesPool::shared`].
    pub const DEFAULT_BLOCK_SIZE: usize = 4096;

    /// Create a pool vending blocks of `block_size` bytes.
    ///
    /// A `block_size` of zero is clamped to one byte.
    pub fn new(block_size: usize) -> Self {
        Self { block_size: block_size.max(1), free: Mutex::new(Vec::new()) }
    }

    /// A shared pool with the default block size.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(Self::DEFAULT_BLOCK_SIZE))
    }

    /// Size in bytes of every block this pool vends.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Rent a block, reusing a pooled one when available.
    pub fn rent(self: &Arc<Self>) -> PooledBlock {
        let reused = match self.free.lock() {
            Ok(mut free) => free.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };

        let data = reused.unwrap_or_else(|| vec![0u8; self.block_size].into_boxed_slice());

        debug_assert_eq!(data.len(), self.block_size);

        PooledBlock { data, pool: Arc::clone(self) }
    }

    /// Rent a block of at least `min_len` bytes.
    ///
    /// Requests within the pool's block size are served from the free
    /// list; larger requests allocate an oversized block that is scrubbed
    /// but not retained when the guard drops. Either way the returned
    /// block may be longer than `min_len`; callers track their logical
    /// length separately.
    pub fn rent_at_least(self: &Arc<Self>, min_len: usize) -> PooledBlock {
        if min_len <= self.block_size {
            return self.rent();
        }

        PooledBlock {
            data: vec![0u8; min_len].into_boxed_slice(),
            pool: Arc::clone(self),
        }
    }

    /// Number of blocks currently parked in the free list.
    pub fn pooled_block_count(&self) -> usize {
        match self.free.lock() {
            Ok(free) => free.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn restore(&self, block: Box<[u8]>) {
        // Blocks from a different configuration era are dropped instead of
        // poisoning the free list.
        if block.len() != self.block_size {
            return;
        }

        match self.free.lock() {
            Ok(mut free) => free.push(block),
            Err(poisoned) => poisoned.into_inner().push(block),
        }
    }
}

/// RAII guard for a rented block.
///
/// Dereferences to the block's bytes. Dropping the guard zeroes the block
/// and returns it to its pool.
pub struct PooledBlock {
    data: Box<[u8]>,
    pool: Arc<BytesPool>,
}

impl std::ops::Deref for PooledBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl std::ops::DerefMut for PooledBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        let mut block = std::mem::take(&mut self.data);
        block.zeroize();
        self.pool.restore(block);
    }
}
