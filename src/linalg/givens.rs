//! Givens rotations and in-place orthogonal triangularization.
//!
//! `fast_givens_triangularize` is the primitive behind the array
//! (square-root) filter: it reduces the augmented working block to lower
//! triangular form by post-multiplying with plane rotations. Being an
//! orthogonal transform it preserves the Gram matrix A A' exactly, which
//! is what keeps the propagated covariance factor positive semi-definite
//! where a direct `P - K Z P` update can fail.

use nalgebra::DMatrix;

/// Apply the rotation (c, s) to columns `i` and `j` of `m`.
pub fn rotate_columns(m: &mut DMatrix<f64>, i: usize, j: usize, c: f64, s: f64) {
    for r in 0..m.nrows() {
        let x = m[(r, i)];
        let y = m[(r, j)];
        m[(r, i)] = c * x + s * y;
        m[(r, j)] = -s * x + c * y;
    }
}

/// Reduce `a` (nrows <= ncols) to lower triangular form in place,
/// with a non-negative diagonal.
pub fn fast_givens_triangularize(a: &mut DMatrix<f64>) {
    let nr = a.nrows();
    let nc = a.ncols();
    for r in 0..nr.min(nc) {
        for c in (r + 1)..nc {
            let y = a[(r, c)];
            if y == 0.0 {
                continue;
            }
            let x = a[(r, r)];
            let h = x.hypot(y);
            rotate_columns(a, r, c, x / h, y / h);
            a[(r, r)] = h;
            a[(r, c)] = 0.0;
        }
        if a[(r, r)] < 0.0 {
            for i in 0..nr {
                a[(i, r)] = -a[(i, r)];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangularize_zeroes_upper_part() {
        let mut a = DMatrix::from_row_slice(
            2,
            4,
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        );
        fast_givens_triangularize(&mut a);
        assert!(a[(0, 1)].abs() < 1e-14);
        assert!(a[(0, 2)].abs() < 1e-14);
        assert!(a[(0, 3)].abs() < 1e-14);
        assert!(a[(0, 0)] >= 0.0);
        assert!(a[(1, 1)] >= 0.0);
    }

    #[test]
    fn test_triangularize_preserves_gram_matrix() {
        let orig = DMatrix::from_row_slice(
            3,
            5,
            &[
                1.0, -2.0, 0.5, 3.0, 1.0, //
                0.0, 1.0, 2.0, -1.0, 0.5, //
                2.0, 0.0, 1.0, 1.0, -1.0,
            ],
        );
        let gram0 = &orig * orig.transpose();
        let mut a = orig.clone();
        fast_givens_triangularize(&mut a);
        let gram1 = &a * a.transpose();
        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (gram0[(i, j)] - gram1[(i, j)]).abs() < 1e-12,
                    "gram mismatch at ({}, {})",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_rotate_columns_is_orthogonal() {
        let mut m = DMatrix::from_row_slice(2, 2, &[3.0, 4.0, 1.0, -1.0]);
        let n0 = m.column(0).norm_squared() + m.column(1).norm_squared();
        let (c, s) = (0.6, 0.8);
        rotate_columns(&mut m, 0, 1, c, s);
        let n1 = m.column(0).norm_squared() + m.column(1).norm_squared();
        assert!((n0 - n1).abs() < 1e-12);
    }
}
