//! Regression effects with diffuse coefficients.
//!
//! The coefficients sit in the state with identity dynamics and no
//! state noise; the loading row at time t is the t-th row of the
//! regressor matrix X. Initialization is fully diffuse, so the
//! coefficients are resolved from the data (by the diffuse filter or
//! the augmented filter's least-squares reduction).

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};
use crate::model::{Dynamics, Initialization, Loading, StateSpaceModel};

pub struct RegressionDynamics {
    k: usize,
}

impl Dynamics for RegressionDynamics {
    fn dim(&self) -> usize {
        self.k
    }

    fn noise_dim(&self) -> usize {
        0
    }

    fn t_into(&self, _t: usize, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        for i in 0..self.k {
            out[(i, i)] = 1.0;
        }
    }

    fn s_into(&self, _out: &mut DMatrix<f64>) {}

    fn q_into(&self, _out: &mut DMatrix<f64>) {}

    fn tx(&self, _t: usize, _x: &mut DVector<f64>) {}

    fn xt(&self, _t: usize, _x: &mut DVector<f64>) {}

    fn add_noise_cov(&self, _t: usize, _p: &mut DMatrix<f64>) {}
}

pub struct RegressionLoading {
    /// Regressors, one row per time step (n x k).
    x: DMatrix<f64>,
}

impl Loading for RegressionLoading {
    fn dim(&self) -> usize {
        self.x.ncols()
    }

    fn time_invariant(&self) -> bool {
        false
    }

    fn z_into(&self, t: usize, out: &mut DVector<f64>) {
        for j in 0..self.x.ncols() {
            out[j] = self.x[(t, j)];
        }
    }

    fn horizon(&self) -> Option<usize> {
        Some(self.x.nrows())
    }

    fn z_col(&self, t: usize, j: usize) -> f64 {
        self.x[(t, j)]
    }
}

pub struct Regression;

impl Regression {
    /// `x` holds the regressors, one row per observation.
    pub fn model(x: DMatrix<f64>) -> Result<StateSpaceModel> {
        let k = x.ncols();
        if k == 0 {
            return Err(SsfError::DataError(
                "regression model needs at least one regressor".into(),
            ));
        }
        StateSpaceModel::new(
            Box::new(RegressionDynamics { k }),
            Box::new(RegressionLoading { x }),
            Initialization::diffuse(k),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_model_shape() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let m = Regression::model(x).unwrap();
        assert_eq!(m.dim(), 2);
        assert_eq!(m.noise_dim(), 0);
        assert_eq!(m.initialization().diffuse_dim(), 2);
        assert!(!m.time_invariant());

        let z = m.z_vector(2);
        assert_eq!(z[0], 1.0);
        assert_eq!(z[1], 2.0);
    }

    #[test]
    fn test_regression_dynamics_identity() {
        let d = RegressionDynamics { k: 3 };
        let mut x = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        d.tx(0, &mut x);
        assert_eq!(x[1], 2.0);
        let mut p = DMatrix::identity(3, 3);
        d.add_noise_cov(0, &mut p);
        assert_eq!(p[(0, 0)], 1.0);
    }

    #[test]
    fn test_empty_regressors_rejected() {
        assert!(Regression::model(DMatrix::zeros(5, 0)).is_err());
    }

    #[test]
    fn test_series_longer_than_regressors_rejected() {
        let x = DMatrix::from_element(4, 1, 1.0);
        let model = Regression::model(x)
            .unwrap()
            .with_measurement_error(1.0)
            .unwrap();
        assert_eq!(model.loading().horizon(), Some(4));
        let y = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!(matches!(
            crate::filter::KalmanFilter::default().likelihood(&model, &y, false),
            Err(SsfError::DimensionMismatch { .. })
        ));
    }
}
