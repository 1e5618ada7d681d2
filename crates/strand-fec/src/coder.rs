//! Systematic Reed-Solomon coder over equal-length packets.

use std::sync::Arc;

use rayon::prelude::{
    IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator,
    ParallelIterator,
};
use strand_bytes::BytesPool;
use tokio_util::sync::CancellationToken;

use crate::{
    error::CodingError,
    gf256::{GfTables, add_mul},
    matrix::{create_decode_matrix, create_encode_matrix},
};

/// Systematic Reed-Solomon coder with parameters `k` (data packets) and
/// `n` (total packets), `1 <= k <= n <= 256`.
///
/// The encode matrix and arithmetic tables are immutable after
/// construction; a coder is safe to share across threads. Encode and
/// decode fan their per-row work out over a worker pool bounded by the
/// `concurrency` construction parameter and poll the supplied
/// cancellation token between rows and between column accumulations.
pub struct ReedSolomon {
    k: usize,
    n: usize,
    enc_matrix: Vec<u8>,
    tables: &'static GfTables,
    workers: rayon::ThreadPool,
    scratch_pool: Arc<BytesPool>,
}

impl ReedSolomon {
    /// Create a coder for `k` data packets out of `n` total packets,
    /// running at most `concurrency` rows in parallel.
    pub fn new(k: usize, n: usize, concurrency: usize) -> Result<Self, CodingError> {
        if k == 0 || k > n || n > 256 || concurrency == 0 {
            return Err(CodingError::InvalidParameters { k, n, concurrency });
        }

        let tables = GfTables::global();
        let enc_matrix = create_encode_matrix(tables, k, n)?;

        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .build()
            .map_err(|e| CodingError::WorkerPool(e.to_string()))?;

        Ok(Self {
            k,
            n,
            enc_matrix,
            tables,
            workers,
            scratch_pool: BytesPool::shared(),
        })
    }

    /// Number of data packets.
    pub fn data_packet_count(&self) -> usize {
        self.k
    }

    /// Total number of coded packets.
    pub fn total_packet_count(&self) -> usize {
        self.n
    }

    /// Produce coded packets from the `k` source packets.
    ///
    /// `index` and `repairs` are parallel arrays: `repairs[row]` receives
    /// the coded packet at global position `index[row]`. Positions below
    /// `k` are plain copies of the corresponding source; positions at or
    /// above `k` are parity rows of the encode matrix.
    ///
    /// On cancellation partially written repairs may be observed.
    pub fn encode(
        &self,
        sources: &[&[u8]],
        index: &[usize],
        repairs: &mut [&mut [u8]],
        packet_length: usize,
        cancel: &CancellationToken,
    ) -> Result<(), CodingError> {
        if sources.len() != self.k {
            return Err(CodingError::ArityMismatch {
                what: "source packets",
                expected: self.k,
                actual: sources.len(),
            });
        }
        if repairs.len() != index.len() {
            return Err(CodingError::ArityMismatch {
                what: "repair packets",
                expected: index.len(),
                actual: repairs.len(),
            });
        }
        for (position, source) in sources.iter().enumerate() {
            check_packet_length(position, source.len(), packet_length)?;
        }
        for (position, repair) in repairs.iter().enumerate() {
            check_packet_length(position, repair.len(), packet_length)?;
        }
        for &value in index {
            if value >= self.n {
                return Err(CodingError::IndexOutOfRange { value, n: self.n });
            }
        }

        self.workers.install(|| {
            repairs
                .par_iter_mut()
                .zip(index)
                .try_for_each(|(repair, &position)| {
                    if cancel.is_cancelled() {
                        return Err(CodingError::Cancelled);
                    }

                    if position < self.k {
                        repair.copy_from_slice(sources[position]);
                        return Ok(());
                    }

                    repair.fill(0);
                    let row = &self.enc_matrix[position * self.k..(position + 1) * self.k];
                    for (col, source) in sources.iter().enumerate() {
                        if cancel.is_cancelled() {
                            return Err(CodingError::Cancelled);
                        }
                        add_mul(self.tables, source, repair, row[col]);
                    }
                    Ok(())
                })
        })
    }

    /// Recover the `k` data packets in place from any `k` distinct coded
    /// packets.
    ///
    /// `packets[row]` holds the coded packet at global position
    /// `index[row]`. On success `packets[i]` holds data packet `i` and
    /// `index[i] == i` for every row.
    pub fn decode(
        &self,
        packets: &mut [Vec<u8>],
        index: &mut [usize],
        packet_length: usize,
        cancel: &CancellationToken,
    ) -> Result<(), CodingError> {
        if packets.len() != self.k {
            return Err(CodingError::ArityMismatch {
                what: "coded packets",
                expected: self.k,
                actual: packets.len(),
            });
        }
        if index.len() != self.k {
            return Err(CodingError::ArityMismatch {
                what: "packet indices",
                expected: self.k,
                actual: index.len(),
            });
        }
        for (position, packet) in packets.iter().enumerate() {
            check_packet_length(position, packet.len(), packet_length)?;
        }
        for &value in index.iter() {
            if value >= self.n {
                return Err(CodingError::IndexOutOfRange { value, n: self.n });
            }
        }

        shuffle(packets, index, self.k)?;

        let dec_matrix =
            create_decode_matrix(self.tables, &self.enc_matrix, index, self.k, self.n)?;

        // Rows already holding their own data packet are done after the
        // shuffle; only parity positions need the matrix solve.
        let missing: Vec<usize> =
            (0..self.k).filter(|&row| index[row] >= self.k).collect();

        let decoded: Vec<(usize, strand_bytes::PooledBlock)> = self.workers.install(|| {
            missing
                .par_iter()
                .map(|&row| {
                    if cancel.is_cancelled() {
                        return Err(CodingError::Cancelled);
                    }

                    let mut scratch = self.scratch_pool.rent_at_least(packet_length);
                    scratch[..packet_length].fill(0);

                    let coefficients = &dec_matrix[row * self.k..(row + 1) * self.k];
                    for (col, packet) in packets.iter().enumerate() {
                        if cancel.is_cancelled() {
                            return Err(CodingError::Cancelled);
                        }
                        add_mul(
                            self.tables,
                            &packet[..packet_length],
                            &mut scratch[..packet_length],
                            coefficients[col],
                        );
                    }
                    Ok((row, scratch))
                })
                .collect::<Result<Vec<_>, CodingError>>()
        })?;

        for (row, scratch) in decoded {
            packets[row][..packet_length].copy_from_slice(&scratch[..packet_length]);
            index[row] = row;
        }

        Ok(())
    }
}

/// Move every received data packet into its natural slot, leaving only
/// parity packets at rows that need the matrix solve.
fn shuffle(
    packets: &mut [Vec<u8>],
    index: &mut [usize],
    k: usize,
) -> Result<(), CodingError> {
    let mut row = 0;
    while row < k {
        let target = index[row];
        if target >= k || target == row {
            row += 1;
            continue;
        }

        if index[target] == target {
            return Err(CodingError::DuplicateIndex { index: target });
        }

        packets.swap(row, target);
        index.swap(row, target);
    }
    Ok(())
}

fn check_packet_length(
    position: usize,
    actual: usize,
    expected: usize,
) -> Result<(), CodingError> {
    if actual != expected {
        return Err(CodingError::PacketLengthMismatch { position, expected, actual });
    }
    Ok(())
}
