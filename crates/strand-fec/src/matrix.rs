//! Encode/decode matrix construction and inversion over GF(2^8).

use crate::{error::CodingError, gf256::GfTables};

/// Build the systematic n x k encode matrix.
///
/// Rows `0..k` are the identity, so the first `k` coded packets equal the
/// data packets. Rows `k..n` come from a Vandermonde matrix over the
/// points `{0, 1, alpha, alpha^2, ...}` multiplied by the inverse of its
/// top k x k block, which keeps every k x k submatrix invertible.
pub(crate) fn create_encode_matrix(
    tables: &GfTables,
    k: usize,
    n: usize,
) -> Result<Vec<u8>, CodingError> {
    debug_assert!(k >= 1 && k <= n && n <= 256);

    // Vandermonde rows: row 0 is the evaluation at x = 0, row r > 0 the
    // evaluation at x = alpha^(r-1), column c holding x^c.
    let mut tmp = vec![0u8; n * k];
    tmp[0] = 1;
    for row in 1..n {
        for col in 0..k {
            tmp[row * k + col] = tables.exp[((row - 1) * col) % 255];
        }
    }

    invert_vandermonde(tables, &mut tmp[..k * k], k);

    let mut enc = vec![0u8; n * k];

    // Bottom rows: original Vandermonde rows times the inverted top block.
    for row in k..n {
        for col in 0..k {
            let mut acc = 0u8;
            for i in 0..k {
                acc ^= tables.mul(tmp[row * k + i], tmp[i * k + col]);
            }
            enc[row * k + col] = acc;
        }
    }

    // Top block: identity.
    for i in 0..k {
        enc[i * k + i] = 1;
    }

    Ok(enc)
}

/// Assemble and invert the k x k decode matrix for the packets named by
/// `index`.
///
/// Row `i` of the assembled matrix is row `index[i]` of the encode
/// matrix; inverting it yields the coefficients that reconstruct the
/// original data from the held packets.
pub(crate) fn create_decode_matrix(
    tables: &GfTables,
    enc_matrix: &[u8],
    index: &[usize],
    k: usize,
    n: usize,
) -> Result<Vec<u8>, CodingError> {
    let mut dec = vec![0u8; k * k];
    for (row, &packet_index) in index.iter().enumerate() {
        if packet_index >= n {
            return Err(CodingError::IndexOutOfRange { value: packet_index, n });
        }
        dec[row * k..(row + 1) * k]
            .copy_from_slice(&enc_matrix[packet_index * k..(packet_index + 1) * k]);
    }

    invert_matrix(tables, &mut dec, k)?;
    Ok(dec)
}

/// Invert a k x k Vandermonde matrix in place.
///
/// Specialized inversion via the interpolation polynomial of the
/// evaluation points, far cheaper than general elimination. The points
/// are read from column 1 (`x^1`), which is why the general path needs
/// `k >= 2`; the 1 x 1 case is its own inverse by construction.
fn invert_vandermonde(tables: &GfTables, matrix: &mut [u8], k: usize) {
    if k == 1 {
        return;
    }

    let points: Vec<u8> = (0..k).map(|row| matrix[row * k + 1]).collect();

    // c holds the coefficients of prod_i (x - points[i]), built
    // incrementally; subtraction and addition coincide in GF(2^8).
    let mut c = vec![0u8; k];
    c[k - 1] = points[0];
    for i in 1..k {
        let p_i = points[i];
        for j in (k - i)..(k - 1) {
            c[j] ^= tables.mul(p_i, c[j + 1]);
        }
        c[k - 1] ^= p_i;
    }

    let mut b = vec![0u8; k];
    for row in 0..k {
        let x = points[row];

        // Synthetic division of the master polynomial by (x - points[row])
        // yields the numerator of the row's Lagrange basis polynomial; t
        // accumulates its value at the point, the denominator.
        let mut t = 1u8;
        b[k - 1] = 1;
        for i in (0..k - 1).rev() {
            b[i] = c[i + 1] ^ tables.mul(x, b[i + 1]);
            t = tables.mul(x, t) ^ b[i];
        }

        let t_inv = tables.inv[t as usize];
        for col in 0..k {
            matrix[col * k + row] = tables.mul(t_inv, b[col]);
        }
    }
}

/// Invert a k x k matrix in place via Gauss-Jordan with full pivoting.
pub(crate) fn invert_matrix(
    tables: &GfTables,
    matrix: &mut [u8],
    k: usize,
) -> Result<(), CodingError> {
    let mut indxr = vec![0usize; k];
    let mut indxc = vec![0usize; k];
    let mut ipiv = vec![false; k];

    for col in 0..k {
        // Pivot search: prefer the diagonal, else the first nonzero
        // element in an unpivoted row/column pair.
        let mut pivot = None;
        if !ipiv[col] && matrix[col * k + col] != 0 {
            pivot = Some((col, col));
        } else {
            'rows: for row in 0..k {
                if ipiv[row] {
                    continue;
                }
                for ix in 0..k {
                    if !ipiv[ix] && matrix[row * k + ix] != 0 {
                        pivot = Some((row, ix));
                        break 'rows;
                    }
                }
            }
        }
        let Some((irow, icol)) = pivot else {
            return Err(CodingError::SingularMatrix { column: col });
        };

        ipiv[icol] = true;
        if irow != icol {
            for ix in 0..k {
                matrix.swap(irow * k + ix, icol * k + ix);
            }
        }
        indxr[col] = irow;
        indxc[col] = icol;

        let pivot_value = matrix[icol * k + icol];
        if pivot_value == 0 {
            return Err(CodingError::SingularMatrix { column: col });
        }

        // In-place inversion: the pivot slot takes 1/pivot before the row
        // is scaled, so the inverse accumulates where the identity would.
        let scale = tables.inv[pivot_value as usize];
        matrix[icol * k + icol] = 1;
        for ix in 0..k {
            matrix[icol * k + ix] = tables.mul(scale, matrix[icol * k + ix]);
        }

        let pivot_row: Vec<u8> = matrix[icol * k..(icol + 1) * k].to_vec();
        for row in 0..k {
            if row == icol {
                continue;
            }
            let factor = matrix[row * k + icol];
            if factor == 0 {
                continue;
            }
            matrix[row * k + icol] = 0;
            for ix in 0..k {
                matrix[row * k + ix] ^= tables.mul(factor, pivot_row[ix]);
            }
        }
    }

    // Undo the column permutations introduced by full pivoting.
    for col in (0..k).rev() {
        if indxr[col] != indxc[col] {
            for row in 0..k {
                matrix.swap(row * k + indxr[col], row * k + indxc[col]);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multiply(tables: &GfTables, a: &[u8], b: &[u8], k: usize) -> Vec<u8> {
        let mut out = vec![0u8; k * k];
        for row in 0..k {
            for col in 0..k {
                let mut acc = 0u8;
                for i in 0..k {
                    acc ^= tables.mul(a[row * k + i], b[i * k + col]);
                }
                out[row * k + col] = acc;
            }
        }
        out
    }

    fn identity(k: usize) -> Vec<u8> {
        let mut m = vec![0u8; k * k];
        for i in 0..k {
            m[i * k + i] = 1;
        }
        m
    }

    #[test]
    fn encode_matrix_top_block_is_identity() {
        let tables = GfTables::global();
        let enc = create_encode_matrix(tables, 4, 7).unwrap();
        assert_eq!(&enc[..16], identity(4).as_slice());
    }

    #[test]
    fn invert_matrix_times_original_is_identity() {
        let tables = GfTables::global();
        let enc = create_encode_matrix(tables, 5, 9).unwrap();

        // Any k rows of the encode matrix form an invertible matrix.
        let index = [0usize, 5, 2, 8, 6];
        let mut original = vec![0u8; 25];
        for (row, &pi) in index.iter().enumerate() {
            original[row * 5..(row + 1) * 5].copy_from_slice(&enc[pi * 5..(pi + 1) * 5]);
        }

        let mut inverted = original.clone();
        invert_matrix(tables, &mut inverted, 5).unwrap();

        assert_eq!(multiply(tables, &inverted, &original, 5), identity(5));
    }

    #[test]
    fn invert_matrix_rejects_singular_input() {
        let tables = GfTables::global();
        // Two identical rows cannot be inverted.
        let mut matrix = vec![
            1, 2, 3, //
            1, 2, 3, //
            0, 1, 1,
        ];
        let result = invert_matrix(tables, &mut matrix, 3);
        assert!(matches!(result, Err(CodingError::SingularMatrix { .. })));
    }

    #[test]
    fn invert_matrix_rejects_zero_matrix() {
        let tables = GfTables::global();
        let mut matrix = vec![0u8; 16];
        let result = invert_matrix(tables, &mut matrix, 4);
        assert!(matches!(result, Err(CodingError::SingularMatrix { column: 0 })));
    }

    #[test]
    fn decode_matrix_for_systematic_rows_is_identity() {
        let tables = GfTables::global();
        let enc = create_encode_matrix(tables, 3, 6).unwrap();
        let dec = create_decode_matrix(tables, &enc, &[0, 1, 2], 3, 6).unwrap();
        assert_eq!(dec, identity(3));
    }

    #[test]
    fn decode_matrix_rejects_out_of_range_index() {
        let tables = GfTables::global();
        let enc = create_encode_matrix(tables, 3, 6).unwrap();
        let result = create_decode_matrix(tables, &enc, &[0, 1, 6], 3, 6);
        assert!(matches!(result, Err(CodingError::IndexOutOfRange { value: 6, n: 6 })));
    }

    #[test]
    fn vandermonde_inverse_round_trips() {
        let tables = GfTables::global();
        let k = 6;

        let mut vdm = vec![0u8; k * k];
        vdm[0] = 1;
        for row in 1..k {
            for col in 0..k {
                vdm[row * k + col] = tables.exp[((row - 1) * col) % 255];
            }
        }

        let mut inverted = vdm.clone();
        invert_vandermonde(tables, &mut inverted, k);

        assert_eq!(multiply(tables, &inverted, &vdm, k), identity(k));
    }
}
