//! GF(2^8) arithmetic tables.
//!
//! The field is generated by alpha = 2 under the reduction polynomial
//! x^8 + x^4 + x^3 + x^2 + 1 (0x11D). Tables are computed once per
//! process and shared immutably.

use std::sync::OnceLock;

/// Reduction polynomial, x^8 + x^4 + x^3 + x^2 + 1.
const FIELD_POLY: u16 = 0x11D;

/// Sentinel stored in `log[0]`; zero has no discrete logarithm.
pub(crate) const LOG_ZERO: u8 = 255;

static TABLES: OnceLock<GfTables> = OnceLock::new();

/// Precomputed GF(2^8) arithmetic tables.
///
/// `exp` is doubled so `exp[log[a] + log[b]]` multiplies without a
/// modulo; `mul` is the full 256x256 product table used by the hot
/// [`add_mul`] loop.
pub(crate) struct GfTables {
    pub(crate) exp: [u8; 510],
    pub(crate) log: [u8; 256],
    pub(crate) inv: [u8; 256],
    mul: Vec<[u8; 256]>,
}

impl GfTables {
    /// The process-wide table set.
    pub(crate) fn global() -> &'static Self {
        TABLES.get_or_init(Self::build)
    }

    fn build() -> Self {
        let mut exp = [0u8; 510];
        let mut log = [0u8; 256];

        let mut value: u16 = 1;
        for power in 0..255 {
            exp[power] = value as u8;
            log[value as usize] = power as u8;
            value <<= 1;
            if value & 0x100 != 0 {
                value ^= FIELD_POLY;
            }
        }
        for power in 255..510 {
            exp[power] = exp[power - 255];
        }
        log[0] = LOG_ZERO;

        let mut inv = [0u8; 256];
        for x in 1..256 {
            inv[x] = exp[255 - log[x] as usize];
        }

        let mut mul = vec![[0u8; 256]; 256];
        for a in 1..256 {
            let log_a = log[a] as usize;
            for b in 1..256 {
                mul[a][b] = exp[log_a + log[b] as usize];
            }
        }

        Self { exp, log, inv, mul }
    }

    /// Product of two field elements.
    pub(crate) fn mul(&self, a: u8, b: u8) -> u8 {
        self.mul[a as usize][b as usize]
    }

    /// The row of the multiplication table for a fixed coefficient.
    pub(crate) fn mul_row(&self, coefficient: u8) -> &[u8; 256] {
        &self.mul[coefficient as usize]
    }
}

/// `dst[i] ^= c * src[i]` over GF(2^8).
///
/// The workhorse of encode and decode. A zero coefficient is a no-op.
pub(crate) fn add_mul(tables: &GfTables, src: &[u8], dst: &mut [u8], coefficient: u8) {
    if coefficient == 0 {
        return;
    }

    let row = tables.mul_row(coefficient);
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= row[*s as usize];
    }
}
