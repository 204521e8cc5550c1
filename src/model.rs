//! State-space model contract.
//!
//! `a_{t+1} = T_t a_t + S u_t`,  `u_t ~ N(0, Q)`
//! `y_t     = Z_t a_t + eps_t`,  `eps_t ~ N(0, h)`
//!
//! Model families implement the `Dynamics` and `Loading` capabilities;
//! the filters only ever go through these vtables, so a composite model
//! is just another implementation that aggregates sub-model tables.
//! A model is immutable once built and may be shared across concurrent
//! filter passes.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};

/// Transition/noise side of the model.
///
/// `tx`/`xt` apply the transition in place; the default implementations
/// materialize T, families with structure (AR(1), local level, companion
/// forms) override them without building the matrix.
pub trait Dynamics: Send + Sync {
    /// State dimension.
    fn dim(&self) -> usize;

    /// State-noise dimension r (columns of S).
    fn noise_dim(&self) -> usize;

    fn time_invariant(&self) -> bool {
        true
    }

    /// Materialize T_t into `out` (dim x dim).
    fn t_into(&self, t: usize, out: &mut DMatrix<f64>);

    /// Materialize the noise selection S into `out` (dim x r).
    fn s_into(&self, out: &mut DMatrix<f64>);

    /// Materialize the noise covariance Q into `out` (r x r).
    fn q_into(&self, out: &mut DMatrix<f64>);

    /// x <- T_t x.
    fn tx(&self, t: usize, x: &mut DVector<f64>) {
        let n = self.dim();
        let mut tm = DMatrix::zeros(n, n);
        self.t_into(t, &mut tm);
        let y = &tm * &*x;
        x.copy_from(&y);
    }

    /// x <- T_t' x.
    fn xt(&self, t: usize, x: &mut DVector<f64>) {
        let n = self.dim();
        let mut tm = DMatrix::zeros(n, n);
        self.t_into(t, &mut tm);
        let y = tm.transpose() * &*x;
        x.copy_from(&y);
    }

    /// p <- p + S Q S'.
    fn add_noise_cov(&self, _t: usize, p: &mut DMatrix<f64>) {
        let n = self.dim();
        let r = self.noise_dim();
        let mut s = DMatrix::zeros(n, r);
        let mut q = DMatrix::zeros(r, r);
        self.s_into(&mut s);
        self.q_into(&mut q);
        *p += &s * q * s.transpose();
    }
}

/// Measurement loading Z_t (single observation row).
pub trait Loading: Send + Sync {
    fn dim(&self) -> usize;

    fn time_invariant(&self) -> bool {
        true
    }

    /// Materialize the loading row into `out` (length dim).
    fn z_into(&self, t: usize, out: &mut DVector<f64>);

    /// Z_t . x
    fn zx(&self, t: usize, x: &DVector<f64>) -> f64 {
        let mut z = DVector::zeros(self.dim());
        self.z_into(t, &mut z);
        z.dot(x)
    }

    /// Z_t P Z_t'
    fn zpz(&self, t: usize, p: &DMatrix<f64>) -> f64 {
        let mut z = DVector::zeros(self.dim());
        self.z_into(t, &mut z);
        z.dot(&(p * &z))
    }

    /// Number of steps the loading row is defined for; None when the
    /// loading extends to any horizon.
    fn horizon(&self) -> Option<usize> {
        None
    }

    /// Loading weight of state column `j` (its contribution to the
    /// measurement at time t).
    fn z_col(&self, t: usize, j: usize) -> f64 {
        let mut z = DVector::zeros(self.dim());
        self.z_into(t, &mut z);
        z[j]
    }
}

/// Initial state: finite part plus a diffuse subspace of dimension d.
#[derive(Debug, Clone)]
pub struct Initialization {
    /// Initial state mean a_0.
    pub a0: DVector<f64>,
    /// Finite part of P_0.
    pub p0: DMatrix<f64>,
    /// Diffuse basis B (dim x d); P_0 diffuse part is kappa * B B' as
    /// kappa -> infinity. Empty (d = 0) for fully stationary models.
    pub b: DMatrix<f64>,
}

impl Initialization {
    /// Zero mean, zero covariance, no diffuse part.
    pub fn zero(dim: usize) -> Self {
        Self {
            a0: DVector::zeros(dim),
            p0: DMatrix::zeros(dim, dim),
            b: DMatrix::zeros(dim, 0),
        }
    }

    /// Known finite initial distribution.
    pub fn stationary(a0: DVector<f64>, p0: DMatrix<f64>) -> Self {
        let dim = a0.len();
        Self {
            a0,
            p0,
            b: DMatrix::zeros(dim, 0),
        }
    }

    /// Fully diffuse: zero mean, B = I.
    pub fn diffuse(dim: usize) -> Self {
        Self {
            a0: DVector::zeros(dim),
            p0: DMatrix::zeros(dim, dim),
            b: DMatrix::identity(dim, dim),
        }
    }

    /// Finite part plus an explicit diffuse basis.
    pub fn partially_diffuse(a0: DVector<f64>, p0: DMatrix<f64>, b: DMatrix<f64>) -> Self {
        Self { a0, p0, b }
    }

    pub fn diffuse_dim(&self) -> usize {
        self.b.ncols()
    }

    /// The diffuse covariance direction B B'.
    pub fn diffuse_cov(&self) -> DMatrix<f64> {
        &self.b * self.b.transpose()
    }
}

/// Immutable aggregate of the model capabilities.
pub struct StateSpaceModel {
    dynamics: Box<dyn Dynamics>,
    loading: Box<dyn Loading>,
    init: Initialization,
    /// Scalar measurement-error variance (0 = exact measurement).
    h: f64,
}

impl StateSpaceModel {
    pub fn new(
        dynamics: Box<dyn Dynamics>,
        loading: Box<dyn Loading>,
        init: Initialization,
    ) -> Result<Self> {
        let model = Self {
            dynamics,
            loading,
            init,
            h: 0.0,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn with_measurement_error(mut self, h: f64) -> Result<Self> {
        if !(h >= 0.0) {
            return Err(SsfError::DataError(format!(
                "measurement-error variance must be >= 0, got {}",
                h
            )));
        }
        self.h = h;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let dim = self.dynamics.dim();
        if self.loading.dim() != dim {
            return Err(SsfError::DimensionMismatch {
                what: "loading",
                expected: dim,
                got: self.loading.dim(),
            });
        }
        if self.init.a0.len() != dim {
            return Err(SsfError::DimensionMismatch {
                what: "initial state",
                expected: dim,
                got: self.init.a0.len(),
            });
        }
        if self.init.p0.nrows() != dim || self.init.p0.ncols() != dim {
            return Err(SsfError::DimensionMismatch {
                what: "initial covariance",
                expected: dim,
                got: self.init.p0.nrows(),
            });
        }
        if self.init.b.nrows() != dim {
            return Err(SsfError::DimensionMismatch {
                what: "diffuse basis",
                expected: dim,
                got: self.init.b.nrows(),
            });
        }
        if self.init.diffuse_dim() > dim {
            return Err(SsfError::DiffuseInitialization(format!(
                "diffuse dimension {} exceeds state dimension {}",
                self.init.diffuse_dim(),
                dim
            )));
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dynamics.dim()
    }

    pub fn noise_dim(&self) -> usize {
        self.dynamics.noise_dim()
    }

    pub fn dynamics(&self) -> &dyn Dynamics {
        self.dynamics.as_ref()
    }

    pub fn loading(&self) -> &dyn Loading {
        self.loading.as_ref()
    }

    pub fn initialization(&self) -> &Initialization {
        &self.init
    }

    /// Measurement-error variance at time t.
    pub fn h(&self, _t: usize) -> f64 {
        self.h
    }

    pub fn time_invariant(&self) -> bool {
        self.dynamics.time_invariant() && self.loading.time_invariant()
    }

    /// Fails when a series outruns a finite-horizon loading (a
    /// regression X matrix covers one row per step).
    pub fn check_horizon(&self, n: usize) -> Result<()> {
        match self.loading.horizon() {
            Some(m) if n > m => Err(SsfError::DimensionMismatch {
                what: "observation length vs loading horizon",
                expected: m,
                got: n,
            }),
            _ => Ok(()),
        }
    }

    /// Materialized T_t (convenience for the filters).
    pub fn t_matrix(&self, t: usize) -> DMatrix<f64> {
        let n = self.dim();
        let mut m = DMatrix::zeros(n, n);
        self.dynamics.t_into(t, &mut m);
        m
    }

    /// Materialized Z_t (convenience for the filters).
    pub fn z_vector(&self, t: usize) -> DVector<f64> {
        let mut z = DVector::zeros(self.dim());
        self.loading.z_into(t, &mut z);
        z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyDynamics {
        n: usize,
    }

    impl Dynamics for DummyDynamics {
        fn dim(&self) -> usize {
            self.n
        }
        fn noise_dim(&self) -> usize {
            1
        }
        fn t_into(&self, _t: usize, out: &mut DMatrix<f64>) {
            out.fill(0.0);
            for i in 0..self.n {
                out[(i, i)] = 0.5;
            }
        }
        fn s_into(&self, out: &mut DMatrix<f64>) {
            out.fill(0.0);
            out[(0, 0)] = 1.0;
        }
        fn q_into(&self, out: &mut DMatrix<f64>) {
            out[(0, 0)] = 1.0;
        }
    }

    struct DummyLoading {
        n: usize,
    }

    impl Loading for DummyLoading {
        fn dim(&self) -> usize {
            self.n
        }
        fn z_into(&self, _t: usize, out: &mut DVector<f64>) {
            out.fill(0.0);
            out[0] = 1.0;
        }
    }

    #[test]
    fn test_model_validates_dims() {
        let m = StateSpaceModel::new(
            Box::new(DummyDynamics { n: 2 }),
            Box::new(DummyLoading { n: 2 }),
            Initialization::zero(2),
        )
        .unwrap();
        assert_eq!(m.dim(), 2);
        assert_eq!(m.noise_dim(), 1);
        assert_eq!(m.h(0), 0.0);
    }

    #[test]
    fn test_model_rejects_loading_mismatch() {
        let err = StateSpaceModel::new(
            Box::new(DummyDynamics { n: 2 }),
            Box::new(DummyLoading { n: 3 }),
            Initialization::zero(2),
        );
        assert!(matches!(err, Err(SsfError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_default_tx_matches_materialized() {
        let dyn_ = DummyDynamics { n: 3 };
        let mut x = DVector::from_row_slice(&[1.0, 2.0, 4.0]);
        dyn_.tx(0, &mut x);
        assert!((x[0] - 0.5).abs() < 1e-15);
        assert!((x[1] - 1.0).abs() < 1e-15);
        assert!((x[2] - 2.0).abs() < 1e-15);
    }

    #[test]
    fn test_default_add_noise_cov() {
        let dyn_ = DummyDynamics { n: 2 };
        let mut p = DMatrix::zeros(2, 2);
        dyn_.add_noise_cov(0, &mut p);
        assert!((p[(0, 0)] - 1.0).abs() < 1e-15);
        assert!(p[(1, 1)].abs() < 1e-15);
    }

    #[test]
    fn test_initialization_diffuse_dim() {
        let init = Initialization::diffuse(3);
        assert_eq!(init.diffuse_dim(), 3);
        let cov = init.diffuse_cov();
        assert!((cov[(0, 0)] - 1.0).abs() < 1e-15);
        assert!(cov[(0, 1)].abs() < 1e-15);
    }

    #[test]
    fn test_negative_measurement_error_rejected() {
        let m = StateSpaceModel::new(
            Box::new(DummyDynamics { n: 1 }),
            Box::new(DummyLoading { n: 1 }),
            Initialization::zero(1),
        )
        .unwrap();
        assert!(m.with_measurement_error(-1.0).is_err());
    }
}
