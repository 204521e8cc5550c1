//! Structural component families: AR(1), local level, local linear
//! trend, seasonal dummies.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};
use crate::model::{Dynamics, Initialization, Loading, StateSpaceModel};

/// Unit loading on a single state column.
pub struct UnitLoading {
    dim: usize,
    index: usize,
}

impl UnitLoading {
    pub fn new(dim: usize, index: usize) -> Self {
        Self { dim, index }
    }
}

impl Loading for UnitLoading {
    fn dim(&self) -> usize {
        self.dim
    }

    fn z_into(&self, _t: usize, out: &mut DVector<f64>) {
        out.fill(0.0);
        out[self.index] = 1.0;
    }

    fn zx(&self, _t: usize, x: &DVector<f64>) -> f64 {
        x[self.index]
    }

    fn zpz(&self, _t: usize, p: &DMatrix<f64>) -> f64 {
        p[(self.index, self.index)]
    }

    fn z_col(&self, _t: usize, j: usize) -> f64 {
        if j == self.index {
            1.0
        } else {
            0.0
        }
    }
}

/// AR(1): a_{t+1} = rho a_t + u_t.
pub struct Ar1 {
    pub rho: f64,
    pub var: f64,
}

impl Ar1 {
    /// Stationary model when |rho| < 1, diffuse otherwise.
    pub fn model(rho: f64, var: f64) -> Result<StateSpaceModel> {
        let init = if rho.abs() < 1.0 {
            Initialization::stationary(
                DVector::zeros(1),
                DMatrix::from_element(1, 1, var / (1.0 - rho * rho)),
            )
        } else {
            Initialization::diffuse(1)
        };
        StateSpaceModel::new(
            Box::new(Ar1 { rho, var }),
            Box::new(UnitLoading::new(1, 0)),
            init,
        )
    }

    /// Zero-initialized variant (known a_0 = 0, P_0 = 0).
    pub fn model_zero_init(rho: f64, var: f64) -> Result<StateSpaceModel> {
        StateSpaceModel::new(
            Box::new(Ar1 { rho, var }),
            Box::new(UnitLoading::new(1, 0)),
            Initialization::zero(1),
        )
    }
}

impl Dynamics for Ar1 {
    fn dim(&self) -> usize {
        1
    }

    fn noise_dim(&self) -> usize {
        1
    }

    fn t_into(&self, _t: usize, out: &mut DMatrix<f64>) {
        out[(0, 0)] = self.rho;
    }

    fn s_into(&self, out: &mut DMatrix<f64>) {
        out[(0, 0)] = 1.0;
    }

    fn q_into(&self, out: &mut DMatrix<f64>) {
        out[(0, 0)] = self.var;
    }

    fn tx(&self, _t: usize, x: &mut DVector<f64>) {
        x[0] *= self.rho;
    }

    fn xt(&self, _t: usize, x: &mut DVector<f64>) {
        x[0] *= self.rho;
    }

    fn add_noise_cov(&self, _t: usize, p: &mut DMatrix<f64>) {
        p[(0, 0)] += self.var;
    }
}

/// Local level (random walk): mu_{t+1} = mu_t + u_t.
pub struct LocalLevel {
    pub var: f64,
}

impl LocalLevel {
    pub fn model(var: f64) -> Result<StateSpaceModel> {
        StateSpaceModel::new(
            Box::new(LocalLevel { var }),
            Box::new(UnitLoading::new(1, 0)),
            Initialization::diffuse(1),
        )
    }
}

impl Dynamics for LocalLevel {
    fn dim(&self) -> usize {
        1
    }

    fn noise_dim(&self) -> usize {
        1
    }

    fn t_into(&self, _t: usize, out: &mut DMatrix<f64>) {
        out[(0, 0)] = 1.0;
    }

    fn s_into(&self, out: &mut DMatrix<f64>) {
        out[(0, 0)] = 1.0;
    }

    fn q_into(&self, out: &mut DMatrix<f64>) {
        out[(0, 0)] = self.var;
    }

    fn tx(&self, _t: usize, _x: &mut DVector<f64>) {}

    fn xt(&self, _t: usize, _x: &mut DVector<f64>) {}

    fn add_noise_cov(&self, _t: usize, p: &mut DMatrix<f64>) {
        p[(0, 0)] += self.var;
    }
}

/// Local linear trend: level + slope, both random walks.
pub struct LocalLinearTrend {
    pub level_var: f64,
    pub slope_var: f64,
}

impl LocalLinearTrend {
    pub fn model(level_var: f64, slope_var: f64) -> Result<StateSpaceModel> {
        StateSpaceModel::new(
            Box::new(LocalLinearTrend {
                level_var,
                slope_var,
            }),
            Box::new(UnitLoading::new(2, 0)),
            Initialization::diffuse(2),
        )
    }
}

impl Dynamics for LocalLinearTrend {
    fn dim(&self) -> usize {
        2
    }

    fn noise_dim(&self) -> usize {
        2
    }

    fn t_into(&self, _t: usize, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        out[(0, 0)] = 1.0;
        out[(0, 1)] = 1.0;
        out[(1, 1)] = 1.0;
    }

    fn s_into(&self, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        out[(0, 0)] = 1.0;
        out[(1, 1)] = 1.0;
    }

    fn q_into(&self, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        out[(0, 0)] = self.level_var;
        out[(1, 1)] = self.slope_var;
    }

    fn tx(&self, _t: usize, x: &mut DVector<f64>) {
        x[0] += x[1];
    }

    fn xt(&self, _t: usize, x: &mut DVector<f64>) {
        x[1] += x[0];
    }

    fn add_noise_cov(&self, _t: usize, p: &mut DMatrix<f64>) {
        p[(0, 0)] += self.level_var;
        p[(1, 1)] += self.slope_var;
    }
}

/// Fixed seasonal dummies of the given period: the s-1 seasonal states
/// sum (with the current one) to a zero-mean disturbance.
pub struct SeasonalDummy {
    pub period: usize,
    pub var: f64,
}

impl SeasonalDummy {
    pub fn model(period: usize, var: f64) -> Result<StateSpaceModel> {
        if period < 2 {
            return Err(SsfError::DataError(format!(
                "seasonal period must be >= 2, got {}",
                period
            )));
        }
        let dim = period - 1;
        StateSpaceModel::new(
            Box::new(SeasonalDummy { period, var }),
            Box::new(UnitLoading::new(dim, 0)),
            Initialization::diffuse(dim),
        )
    }
}

impl Dynamics for SeasonalDummy {
    fn dim(&self) -> usize {
        self.period - 1
    }

    fn noise_dim(&self) -> usize {
        1
    }

    fn t_into(&self, _t: usize, out: &mut DMatrix<f64>) {
        let n = self.dim();
        out.fill(0.0);
        for j in 0..n {
            out[(0, j)] = -1.0;
        }
        for i in 1..n {
            out[(i, i - 1)] = 1.0;
        }
    }

    fn s_into(&self, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        out[(0, 0)] = 1.0;
    }

    fn q_into(&self, out: &mut DMatrix<f64>) {
        out[(0, 0)] = self.var;
    }

    fn add_noise_cov(&self, _t: usize, p: &mut DMatrix<f64>) {
        p[(0, 0)] += self.var;
    }
}
