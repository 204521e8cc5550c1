//! Householder QR with an implicit orthogonal factor.
//!
//! Q is never materialized: reflectors are kept in the factored storage
//! and applied through `apply_q`/`apply_qt`. Linearly dependent columns
//! are reported as redundant rather than aborting the decomposition,
//! which is what the regression-effect reductions need.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};

pub struct Householder {
    /// Reflector vectors below each pivot row, R entries elsewhere.
    qr: DMatrix<f64>,
    /// Scaling factor 2/(v'v) of each column's reflector (0 = redundant).
    tau: Vec<f64>,
    /// Diagonal R entry of each column (0 = redundant).
    rdiag: Vec<f64>,
    /// Pivot row assigned to each non-redundant column.
    pivot_row: Vec<usize>,
    rank: usize,
}

impl Householder {
    /// Decompose `a` (m >= n rows required for least squares).
    ///
    /// A column whose remaining norm falls below `eps` times its original
    /// norm counts as redundant; its reflector is skipped and the pivot
    /// row is not advanced.
    pub fn decompose(a: &DMatrix<f64>, eps: f64) -> Self {
        let m = a.nrows();
        let n = a.ncols();
        let mut qr = a.clone();
        let mut tau = vec![0.0; n];
        let mut rdiag = vec![0.0; n];
        let mut pivot_row = vec![usize::MAX; n];
        let orig_norms: Vec<f64> = (0..n).map(|j| qr.column(j).norm()).collect();

        let mut p = 0; // next pivot row
        for j in 0..n {
            if p >= m {
                break;
            }
            let mut alpha2 = 0.0;
            for i in p..m {
                alpha2 += qr[(i, j)] * qr[(i, j)];
            }
            let alpha = alpha2.sqrt();
            if alpha <= eps * orig_norms[j].max(1.0) {
                // dependent on earlier columns
                continue;
            }

            let r_jj = if qr[(p, j)] > 0.0 { -alpha } else { alpha };
            qr[(p, j)] -= r_jj;
            let mut vtv = 0.0;
            for i in p..m {
                vtv += qr[(i, j)] * qr[(i, j)];
            }
            let t = 2.0 / vtv;

            // apply H_j to the remaining columns
            for k in (j + 1)..n {
                let mut s = 0.0;
                for i in p..m {
                    s += qr[(i, j)] * qr[(i, k)];
                }
                let s = s * t;
                for i in p..m {
                    qr[(i, k)] -= s * qr[(i, j)];
                }
            }

            tau[j] = t;
            rdiag[j] = r_jj;
            pivot_row[j] = p;
            p += 1;
        }

        Self {
            qr,
            tau,
            rdiag,
            pivot_row,
            rank: p,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Indices of the columns judged linearly dependent.
    pub fn redundant_columns(&self) -> Vec<usize> {
        (0..self.qr.ncols())
            .filter(|&j| self.pivot_row[j] == usize::MAX)
            .collect()
    }

    /// b <- Q' b.
    pub fn apply_qt(&self, b: &mut DVector<f64>) {
        let m = self.qr.nrows();
        for j in 0..self.qr.ncols() {
            let p = self.pivot_row[j];
            if p == usize::MAX {
                continue;
            }
            let mut s = 0.0;
            for i in p..m {
                s += self.qr[(i, j)] * b[i];
            }
            let s = s * self.tau[j];
            for i in p..m {
                b[i] -= s * self.qr[(i, j)];
            }
        }
    }

    /// b <- Q b (reflectors in reverse order).
    pub fn apply_q(&self, b: &mut DVector<f64>) {
        let m = self.qr.nrows();
        for j in (0..self.qr.ncols()).rev() {
            let p = self.pivot_row[j];
            if p == usize::MAX {
                continue;
            }
            let mut s = 0.0;
            for i in p..m {
                s += self.qr[(i, j)] * b[i];
            }
            let s = s * self.tau[j];
            for i in p..m {
                b[i] -= s * self.qr[(i, j)];
            }
        }
    }

    /// The triangular factor, one row per non-redundant column.
    pub fn r(&self) -> DMatrix<f64> {
        let n = self.qr.ncols();
        let mut r = DMatrix::zeros(self.rank, n);
        for j in 0..n {
            let p = self.pivot_row[j];
            if p == usize::MAX {
                continue;
            }
            r[(p, j)] = self.rdiag[j];
            for k in (j + 1)..n {
                r[(p, k)] = self.qr[(p, k)];
            }
        }
        r
    }

    /// Minimum-norm-ish least-squares solution of ||a x - b||.
    ///
    /// Redundant columns get a zero coefficient.
    pub fn least_squares(&self, b: &DVector<f64>) -> Result<DVector<f64>> {
        let m = self.qr.nrows();
        let n = self.qr.ncols();
        if b.len() != m {
            return Err(SsfError::DimensionMismatch {
                what: "least-squares rhs",
                expected: m,
                got: b.len(),
            });
        }
        let mut c = b.clone();
        self.apply_qt(&mut c);

        let mut x = DVector::zeros(n);
        for j in (0..n).rev() {
            let p = self.pivot_row[j];
            if p == usize::MAX {
                continue;
            }
            let mut s = c[p];
            for k in (j + 1)..n {
                if self.pivot_row[k] != usize::MAX {
                    s -= self.qr[(p, k)] * x[k];
                }
            }
            x[j] = s / self.rdiag[j];
        }
        Ok(x)
    }

    /// Sum of squares of the residual part of Q'b (rows past the rank).
    pub fn residual_ssq(&self, b: &DVector<f64>) -> f64 {
        let mut c = b.clone();
        self.apply_qt(&mut c);
        let mut ssq = 0.0;
        for i in self.rank..c.len() {
            ssq += c[i] * c[i];
        }
        ssq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_rank_least_squares() {
        // x = [2, -1] solves exactly: b = A x
        let a = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let b = DVector::from_row_slice(&[2.0, 1.0, 0.0, -1.0]);
        let h = Householder::decompose(&a, 1e-12);
        assert_eq!(h.rank(), 2);
        assert!(h.redundant_columns().is_empty());
        let x = h.least_squares(&b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] + 1.0).abs() < 1e-12);
        assert!(h.residual_ssq(&b) < 1e-20);
    }

    #[test]
    fn test_redundant_column_reported() {
        // column 2 = 2 * column 0
        let a = DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 0.0, 2.0, 1.0, 1.0, 2.0, 1.0, 2.0, 2.0],
        );
        let h = Householder::decompose(&a, 1e-10);
        assert_eq!(h.rank(), 2);
        assert_eq!(h.redundant_columns(), vec![2]);

        // LS still solves over the independent columns
        let b = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let x = h.least_squares(&b).unwrap();
        assert_eq!(x[2], 0.0);
        let r = &a * &x - &b;
        assert!(r.norm() < 1e-10);
    }

    #[test]
    fn test_qt_q_round_trip() {
        let a = DMatrix::from_row_slice(3, 2, &[3.0, 1.0, -1.0, 2.0, 0.5, 0.25]);
        let h = Householder::decompose(&a, 1e-12);
        let b = DVector::from_row_slice(&[1.0, -2.0, 0.5]);
        let mut v = b.clone();
        h.apply_qt(&mut v);
        // orthogonal transform preserves the norm
        assert!((v.norm() - b.norm()).abs() < 1e-12);
        h.apply_q(&mut v);
        assert!((v - b).norm() < 1e-12);
    }

    #[test]
    fn test_r_reproduces_a_through_q() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let h = Householder::decompose(&a, 1e-12);
        let r = h.r();
        // Q R = A column by column
        for j in 0..2 {
            let mut col = DVector::zeros(3);
            for i in 0..h.rank() {
                col[i] = r[(i, j)];
            }
            h.apply_q(&mut col);
            for i in 0..3 {
                assert!((col[i] - a[(i, j)]).abs() < 1e-12);
            }
        }
    }
}
