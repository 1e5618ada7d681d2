//! Reed-Solomon erasure coding over GF(2^8).
//!
//! A systematic coder: `n` coded packets are produced from `k` data
//! packets, and the first `k` coded packets equal the data. Any `k`
//! distinct coded packets recover the original data exactly.
//!
//! The field is GF(2^8) with the reduction polynomial
//! x^8 + x^4 + x^3 + x^2 + 1. Arithmetic tables are computed once per
//! process and shared immutably across threads; per-row encode and decode
//! work runs on a bounded worker pool owned by the coder.
//!
//! ```
//! use strand_fec::ReedSolomon;
//! use tokio_util::sync::CancellationToken;
//!
//! let coder = ReedSolomon::new(4, 6, 2).unwrap();
//! let sources: Vec<Vec<u8>> = (0..4).map(|i| vec![i as u8; 16]).collect();
//! let source_refs: Vec<&[u8]> = sources.iter().map(Vec::as_slice).collect();
//!
//! // Produce the two parity packets (global positions 4 and 5).
//! let mut parity = vec![vec![0u8; 16]; 2];
//! let mut parity_refs: Vec<&mut [u8]> =
//!     parity.iter_mut().map(Vec::as_mut_slice).collect();
//! coder
//!     .encode(&source_refs, &[4, 5], &mut parity_refs, 16, &CancellationToken::new())
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]

mod coder;
mod error;
mod gf256;
mod matrix;

pub use coder::ReedSolomon;
pub use error::CodingError;
