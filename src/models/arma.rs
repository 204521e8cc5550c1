//! ARMA(p, q) component in Harvey companion form.
//!
//! State dimension m = max(p, q+1). The transition carries the AR
//! coefficients in its first column with ones on the superdiagonal; the
//! noise selection carries [1, theta_1, ..., theta_{m-1}]. The
//! stationary initial covariance solves the discrete Lyapunov equation
//! P = T P T' + R var R'.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};
use crate::linalg::lu::{LuOptions, LuSolver};
use crate::model::{Dynamics, Initialization, StateSpaceModel};
use crate::models::structural::UnitLoading;
use crate::polynomial::{make_ar_poly, make_ma_poly, polymul};

pub struct ArmaDynamics {
    /// Companion first column: phi_1..phi_m (zero-padded).
    phi: Vec<f64>,
    /// Selection column: psi_0 = 1, psi_i = theta_i (zero-padded).
    psi: Vec<f64>,
    var: f64,
}

impl ArmaDynamics {
    pub fn new(ar: &[f64], ma: &[f64], var: f64) -> Self {
        let m = ar.len().max(ma.len() + 1);
        let ar_poly = make_ar_poly(ar);
        let ma_poly = make_ma_poly(ma);

        let mut phi = vec![0.0; m];
        for i in 0..m {
            if i + 1 < ar_poly.len() {
                phi[i] = -ar_poly[i + 1];
            }
        }
        let mut psi = vec![0.0; m];
        for i in 0..m {
            if i < ma_poly.len() {
                psi[i] = ma_poly[i];
            }
        }
        Self { phi, psi, var }
    }

    /// Multiplicative seasonal form: the seasonal polynomials act at
    /// lag multiples of `period` and are convolved with the regular
    /// ones, then the product coefficients feed the companion form.
    pub fn seasonal(
        ar: &[f64],
        ma: &[f64],
        sar: &[f64],
        sma: &[f64],
        period: usize,
        var: f64,
    ) -> Result<Self> {
        if period < 2 && (!sar.is_empty() || !sma.is_empty()) {
            return Err(SsfError::DataError(format!(
                "seasonal lag period must be >= 2, got {}",
                period
            )));
        }
        let full_ar = polymul(&make_ar_poly(ar), &spread(&make_ar_poly(sar), period));
        let full_ma = polymul(&make_ma_poly(ma), &spread(&make_ma_poly(sma), period));
        let ar_exp: Vec<f64> = full_ar[1..].iter().map(|c| -c).collect();
        let ma_exp: Vec<f64> = full_ma[1..].to_vec();
        Ok(Self::new(&ar_exp, &ma_exp, var))
    }
}

/// Stretch a lag polynomial so its coefficients sit at multiples of
/// `period`: 1 + c_1 L + ... becomes 1 + c_1 L^s + ...
fn spread(poly: &[f64], period: usize) -> Vec<f64> {
    if poly.len() <= 1 {
        return vec![1.0];
    }
    let mut out = vec![0.0; (poly.len() - 1) * period + 1];
    for (i, &c) in poly.iter().enumerate() {
        out[i * period] = c;
    }
    out
}

impl Dynamics for ArmaDynamics {
    fn dim(&self) -> usize {
        self.phi.len()
    }

    fn noise_dim(&self) -> usize {
        1
    }

    fn t_into(&self, _t: usize, out: &mut DMatrix<f64>) {
        let m = self.dim();
        out.fill(0.0);
        for i in 0..m {
            out[(i, 0)] = self.phi[i];
        }
        for i in 0..m.saturating_sub(1) {
            out[(i, i + 1)] = 1.0;
        }
    }

    fn s_into(&self, out: &mut DMatrix<f64>) {
        for i in 0..self.dim() {
            out[(i, 0)] = self.psi[i];
        }
    }

    fn q_into(&self, out: &mut DMatrix<f64>) {
        out[(0, 0)] = self.var;
    }

    // companion product without materializing T
    fn tx(&self, _t: usize, x: &mut DVector<f64>) {
        let m = self.dim();
        let x0 = x[0];
        for i in 0..m {
            let next = if i + 1 < m { x[i + 1] } else { 0.0 };
            x[i] = self.phi[i] * x0 + next;
        }
    }

    fn xt(&self, _t: usize, x: &mut DVector<f64>) {
        let m = self.dim();
        let mut first = 0.0;
        for i in 0..m {
            first += self.phi[i] * x[i];
        }
        for i in (1..m).rev() {
            x[i] = x[i - 1];
        }
        x[0] = first;
    }

    fn add_noise_cov(&self, _t: usize, p: &mut DMatrix<f64>) {
        let m = self.dim();
        for i in 0..m {
            for j in 0..m {
                p[(i, j)] += self.var * self.psi[i] * self.psi[j];
            }
        }
    }
}

/// Solve the discrete Lyapunov equation P = T P T' + V for P,
/// via the Kronecker system (I - T (x) T) vec(P) = vec(V).
pub fn stationary_covariance(t: &DMatrix<f64>, v: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let m = t.nrows();
    let n2 = m * m;
    let mut a = DMatrix::zeros(n2, n2);
    for i in 0..m {
        for j in 0..m {
            let row = j * m + i;
            for k in 0..m {
                for l in 0..m {
                    let col = l * m + k;
                    let mut val = -t[(i, k)] * t[(j, l)];
                    if row == col {
                        val += 1.0;
                    }
                    a[(row, col)] = val;
                }
            }
        }
    }
    let mut b = DVector::zeros(n2);
    for j in 0..m {
        for i in 0..m {
            b[j * m + i] = v[(i, j)];
        }
    }
    let solver = LuSolver::new(&a, LuOptions::default())?;
    let x = solver.solve(&b)?;
    let mut p = DMatrix::zeros(m, m);
    for j in 0..m {
        for i in 0..m {
            p[(i, j)] = x[j * m + i];
        }
    }
    // enforce exact symmetry
    let pt = p.transpose();
    Ok((p + pt) * 0.5)
}

pub struct Arma;

impl Arma {
    /// Stationary ARMA(p, q) model with innovation variance `var`.
    ///
    /// Fails with `SingularMatrix` when the AR polynomial has a unit
    /// root (no stationary distribution exists).
    pub fn model(ar: &[f64], ma: &[f64], var: f64) -> Result<StateSpaceModel> {
        Self::from_dynamics(ArmaDynamics::new(ar, ma, var))
    }

    /// Multiplicative seasonal ARMA (p, q) x (P, Q)_s with innovation
    /// variance `var`.
    pub fn seasonal_model(
        ar: &[f64],
        ma: &[f64],
        sar: &[f64],
        sma: &[f64],
        period: usize,
        var: f64,
    ) -> Result<StateSpaceModel> {
        Self::from_dynamics(ArmaDynamics::seasonal(ar, ma, sar, sma, period, var)?)
    }

    fn from_dynamics(dynamics: ArmaDynamics) -> Result<StateSpaceModel> {
        let m = dynamics.dim();
        let mut t = DMatrix::zeros(m, m);
        dynamics.t_into(0, &mut t);
        let mut v = DMatrix::zeros(m, m);
        dynamics.add_noise_cov(0, &mut v);
        let p0 = stationary_covariance(&t, &v)?;
        StateSpaceModel::new(
            Box::new(dynamics),
            Box::new(UnitLoading::new(m, 0)),
            Initialization::stationary(DVector::zeros(m), p0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arma11_companion_layout() {
        // phi=0.4139, theta=0.336: T = [[phi, 1], [0, 0]], psi = [1, theta]
        let d = ArmaDynamics::new(&[0.4139], &[0.336], 1.0);
        assert_eq!(d.dim(), 2);
        let mut t = DMatrix::zeros(2, 2);
        d.t_into(0, &mut t);
        assert!((t[(0, 0)] - 0.4139).abs() < 1e-12);
        assert!((t[(0, 1)] - 1.0).abs() < 1e-12);
        assert!(t[(1, 0)].abs() < 1e-12);
        assert!(t[(1, 1)].abs() < 1e-12);

        let mut s = DMatrix::zeros(2, 1);
        d.s_into(&mut s);
        assert!((s[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((s[(1, 0)] - 0.336).abs() < 1e-12);
    }

    #[test]
    fn test_ar2_companion_first_column() {
        let d = ArmaDynamics::new(&[0.5, -0.3], &[], 1.0);
        let mut t = DMatrix::zeros(2, 2);
        d.t_into(0, &mut t);
        assert!((t[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((t[(1, 0)] - (-0.3)).abs() < 1e-12);
        assert!((t[(0, 1)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_tx_xt_match_materialized() {
        let d = ArmaDynamics::new(&[0.5, -0.3, 0.1], &[0.4], 1.0);
        let m = d.dim();
        let mut t = DMatrix::zeros(m, m);
        d.t_into(0, &mut t);
        let x0 = DVector::from_row_slice(&[1.0, -2.0, 0.5]);

        let mut x = x0.clone();
        d.tx(0, &mut x);
        let want = &t * &x0;
        assert!((x - want).norm() < 1e-14);

        let mut y = x0.clone();
        d.xt(0, &mut y);
        let want = t.transpose() * &x0;
        assert!((y - want).norm() < 1e-14);
    }

    #[test]
    fn test_seasonal_pure_seasonal_ar_lag() {
        // (1 - 0.5 L^4): the only AR coefficient sits at lag 4
        let d = ArmaDynamics::seasonal(&[], &[], &[0.5], &[], 4, 1.0).unwrap();
        assert_eq!(d.dim(), 4);
        let mut t = DMatrix::zeros(4, 4);
        d.t_into(0, &mut t);
        assert!(t[(0, 0)].abs() < 1e-12);
        assert!(t[(2, 0)].abs() < 1e-12);
        assert!((t[(3, 0)] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_seasonal_multiplicative_expansion() {
        // (1 - 0.4 L)(1 - 0.5 L^2) = 1 - 0.4 L - 0.5 L^2 + 0.2 L^3
        let d = ArmaDynamics::seasonal(&[0.4], &[], &[0.5], &[], 2, 1.0).unwrap();
        assert_eq!(d.dim(), 3);
        let mut t = DMatrix::zeros(3, 3);
        d.t_into(0, &mut t);
        assert!((t[(0, 0)] - 0.4).abs() < 1e-12);
        assert!((t[(1, 0)] - 0.5).abs() < 1e-12);
        assert!((t[(2, 0)] + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_seasonal_ma_selection_column() {
        let d = ArmaDynamics::seasonal(&[], &[], &[], &[0.3], 4, 1.0).unwrap();
        assert_eq!(d.dim(), 5);
        let mut s = DMatrix::zeros(5, 1);
        d.s_into(&mut s);
        assert!((s[(0, 0)] - 1.0).abs() < 1e-12);
        assert!(s[(1, 0)].abs() < 1e-12);
        assert!((s[(4, 0)] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_seasonal_without_seasonal_part_matches_plain() {
        let plain = Arma::model(&[0.6, -0.2], &[0.3], 1.0).unwrap();
        let seas = Arma::seasonal_model(&[0.6, -0.2], &[0.3], &[], &[], 12, 1.0).unwrap();
        let y = [0.5, -0.2, 1.1, 0.8, -0.4, 0.3];
        let kf = crate::filter::KalmanFilter::default();
        let ll_a = kf.likelihood(&plain, &y, false).unwrap();
        let ll_b = kf.likelihood(&seas, &y, false).unwrap();
        assert!((ll_a.log_likelihood - ll_b.log_likelihood).abs() < 1e-12);
    }

    #[test]
    fn test_seasonal_bad_period_rejected() {
        assert!(ArmaDynamics::seasonal(&[], &[], &[0.5], &[], 1, 1.0).is_err());
    }

    #[test]
    fn test_ar1_stationary_covariance() {
        // AR(1): P = var / (1 - rho^2)
        let d = ArmaDynamics::new(&[0.8], &[], 2.0);
        let mut t = DMatrix::zeros(1, 1);
        d.t_into(0, &mut t);
        let mut v = DMatrix::zeros(1, 1);
        d.add_noise_cov(0, &mut v);
        let p = stationary_covariance(&t, &v).unwrap();
        assert!((p[(0, 0)] - 2.0 / (1.0 - 0.64)).abs() < 1e-10);
    }

    #[test]
    fn test_lyapunov_solution_satisfies_equation() {
        let m = Arma::model(&[0.6, -0.2], &[0.3], 1.5).unwrap();
        let t = m.t_matrix(0);
        let p0 = &m.initialization().p0;
        let mut rhs = &t * p0 * t.transpose();
        m.dynamics().add_noise_cov(0, &mut rhs);
        assert!((p0 - rhs).norm() < 1e-9);
    }

    #[test]
    fn test_unit_root_rejected() {
        assert!(Arma::model(&[1.0], &[], 1.0).is_err());
    }
}
