//! Lower Cholesky decomposition with a configurable pivot tolerance.
//!
//! nalgebra's built-in `cholesky()` gives no control over the pivot
//! threshold and reports failure as `None`; the filter needs a tunable
//! tolerance and the crate's own error taxonomy, so the factorization is
//! done here directly on the `DMatrix` storage.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};

/// Factor a symmetric matrix in place into its lower Cholesky factor.
///
/// On success the lower triangle (diagonal included) holds L and the
/// strict upper triangle is zeroed. Fails with `NotPositiveDefinite`
/// when a diagonal pivot falls below `tol`.
pub fn cholesky_in_place(m: &mut DMatrix<f64>, tol: f64) -> Result<()> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(SsfError::DimensionMismatch {
            what: "cholesky input",
            expected: n,
            got: m.ncols(),
        });
    }
    for j in 0..n {
        let mut d = m[(j, j)];
        for k in 0..j {
            d -= m[(j, k)] * m[(j, k)];
        }
        if d < tol {
            return Err(SsfError::NotPositiveDefinite);
        }
        let d = d.sqrt();
        m[(j, j)] = d;
        for i in (j + 1)..n {
            let mut s = m[(i, j)];
            for k in 0..j {
                s -= m[(i, k)] * m[(j, k)];
            }
            m[(i, j)] = s / d;
        }
        for i in 0..j {
            m[(i, j)] = 0.0;
        }
    }
    Ok(())
}

/// Lower Cholesky factor of `m`, leaving `m` untouched.
pub fn lcholesky(m: &DMatrix<f64>, tol: f64) -> Result<DMatrix<f64>> {
    let mut l = m.clone();
    cholesky_in_place(&mut l, tol)?;
    Ok(l)
}

/// Solve L x = b in place (forward substitution), L lower triangular.
pub fn solve_lower_in_place(l: &DMatrix<f64>, b: &mut DVector<f64>) -> Result<()> {
    let n = l.nrows();
    if b.len() != n {
        return Err(SsfError::DimensionMismatch {
            what: "triangular solve rhs",
            expected: n,
            got: b.len(),
        });
    }
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[(i, k)] * b[k];
        }
        let d = l[(i, i)];
        if d == 0.0 {
            return Err(SsfError::SingularMatrix);
        }
        b[i] = s / d;
    }
    Ok(())
}

/// Solve L' x = b in place (backward substitution), L lower triangular.
pub fn solve_lower_transpose_in_place(l: &DMatrix<f64>, b: &mut DVector<f64>) -> Result<()> {
    let n = l.nrows();
    if b.len() != n {
        return Err(SsfError::DimensionMismatch {
            what: "triangular solve rhs",
            expected: n,
            got: b.len(),
        });
    }
    for i in (0..n).rev() {
        let mut s = b[i];
        for k in (i + 1)..n {
            s -= l[(k, i)] * b[k];
        }
        let d = l[(i, i)];
        if d == 0.0 {
            return Err(SsfError::SingularMatrix);
        }
        b[i] = s / d;
    }
    Ok(())
}

/// Solve (L L') x = b using both triangular sweeps.
pub fn cholesky_solve(l: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let mut x = b.clone();
    solve_lower_in_place(l, &mut x)?;
    solve_lower_transpose_in_place(l, &mut x)?;
    Ok(x)
}

/// Lower Cholesky factor of a positive *semi*-definite matrix.
///
/// Zero pivots (within `tol`) produce a zero column instead of failing;
/// a pivot below `-tol` still fails with `NotPositiveDefinite`. Needed
/// for singular covariances (exact initial states, rank-deficient
/// noise).
pub fn psd_cholesky(m: &DMatrix<f64>, tol: f64) -> Result<DMatrix<f64>> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(SsfError::DimensionMismatch {
            what: "cholesky input",
            expected: n,
            got: m.ncols(),
        });
    }
    let mut l = m.clone();
    for j in 0..n {
        let mut d = l[(j, j)];
        for k in 0..j {
            d -= l[(j, k)] * l[(j, k)];
        }
        if d < -tol {
            return Err(SsfError::NotPositiveDefinite);
        }
        if d <= tol {
            l[(j, j)] = 0.0;
            for i in (j + 1)..n {
                l[(i, j)] = 0.0;
            }
        } else {
            let d = d.sqrt();
            l[(j, j)] = d;
            for i in (j + 1)..n {
                let mut s = l[(i, j)];
                for k in 0..j {
                    s -= l[(i, k)] * l[(j, k)];
                }
                l[(i, j)] = s / d;
            }
        }
        for i in 0..j {
            l[(i, j)] = 0.0;
        }
    }
    Ok(l)
}

/// Whether a symmetric matrix is positive semi-definite, judged by a
/// Cholesky attempt with a small negative slack on the pivots.
pub fn is_psd(m: &DMatrix<f64>, slack: f64) -> bool {
    psd_cholesky(m, slack.abs()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd3() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[4.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0])
    }

    #[test]
    fn test_cholesky_reconstructs() {
        let m = spd3();
        let l = lcholesky(&m, 1e-12).unwrap();
        let back = &l * l.transpose();
        for i in 0..3 {
            for j in 0..3 {
                assert!((back[(i, j)] - m[(i, j)]).abs() < 1e-12);
            }
        }
        // strict upper triangle zeroed
        assert_eq!(l[(0, 1)], 0.0);
        assert_eq!(l[(0, 2)], 0.0);
        assert_eq!(l[(1, 2)], 0.0);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(matches!(
            lcholesky(&m, 1e-12),
            Err(SsfError::NotPositiveDefinite)
        ));
    }

    #[test]
    fn test_cholesky_solve() {
        let m = spd3();
        let l = lcholesky(&m, 1e-12).unwrap();
        let b = DVector::from_row_slice(&[1.0, 0.0, -1.0]);
        let x = cholesky_solve(&l, &b).unwrap();
        let r = &m * &x - &b;
        assert!(r.norm() < 1e-12);
    }

    #[test]
    fn test_is_psd_on_singular_psd() {
        // rank-1 PSD matrix
        let v = DVector::from_row_slice(&[1.0, 2.0]);
        let m = &v * v.transpose();
        assert!(is_psd(&m, 1e-10));
    }

    #[test]
    fn test_psd_cholesky_rank_deficient() {
        let v = DVector::from_row_slice(&[1.0, 2.0, -1.0]);
        let m = &v * v.transpose();
        let l = psd_cholesky(&m, 1e-12).unwrap();
        let back = &l * l.transpose();
        assert!((back - m).norm() < 1e-12);
    }

    #[test]
    fn test_psd_cholesky_rejects_negative() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -0.5]);
        assert!(psd_cholesky(&m, 1e-12).is_err());
    }
}
