//! Array (square-root) Kalman filter.
//!
//! The covariance P is never formed: its lower Cholesky factor L lives
//! inside one augmented working matrix
//!
//!   A = | sqrt(h)   Z L    0 |
//!       |   0       T L    W |        W = S chol(Q)
//!
//! of shape (1+dim) x (1+dim+r). Each step fills the block, applies the
//! orthogonal Givens triangularization, and reads back sqrt(F), the
//! scaled gain and the next L. Because A A' is preserved exactly by the
//! orthogonal transform, the implied covariance L L' cannot lose
//! positive semi-definiteness the way the direct P - K Z P update can.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};
use crate::filter::{FilterOptions, FilteringResults, PredictionError};
use crate::likelihood::Likelihood;
use crate::linalg::cholesky::psd_cholesky;
use crate::linalg::givens::fast_givens_triangularize;
use crate::model::{Dynamics, Initialization, StateSpaceModel};

/// Forward pass history in square-root form.
pub struct ArrayFilteringResults {
    /// Predicted state a_{t|t-1}.
    pub a: Vec<DVector<f64>>,
    /// Predicted covariance factor: P_{t|t-1} = L L'.
    pub l: Vec<DMatrix<f64>>,
    pub errors: Vec<PredictionError>,
}

impl ArrayFilteringResults {
    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// Squared-out view for the smoother (P = L L').
    pub fn into_filtering_results(self) -> FilteringResults {
        let n = self.a.len();
        let mut p = Vec::with_capacity(n);
        let mut pinf = Vec::with_capacity(n);
        for l in &self.l {
            p.push(l * l.transpose());
            pinf.push(None);
        }
        FilteringResults {
            a: self.a,
            p,
            pinf,
            errors: self.errors,
            collapse: 0,
        }
    }
}

pub struct ArrayFilter {
    opts: FilterOptions,
    chol_tol: f64,
}

impl Default for ArrayFilter {
    fn default() -> Self {
        Self {
            opts: FilterOptions::default(),
            chol_tol: 1e-13,
        }
    }
}

impl ArrayFilter {
    pub fn new(opts: FilterOptions, chol_tol: f64) -> Self {
        Self { opts, chol_tol }
    }

    pub fn likelihood(
        &self,
        model: &StateSpaceModel,
        y: &[f64],
        concentrated: bool,
    ) -> Result<Likelihood> {
        let (ssq, log_det, n_obs, _) = self.run(model, y, false)?;
        Likelihood::from_parts(ssq, log_det, 0.0, n_obs, 0, concentrated)
    }

    pub fn filter(&self, model: &StateSpaceModel, y: &[f64]) -> Result<ArrayFilteringResults> {
        let (_, _, _, results) = self.run(model, y, true)?;
        Ok(results.expect("history requested"))
    }

    #[allow(clippy::type_complexity)]
    fn run(
        &self,
        model: &StateSpaceModel,
        y: &[f64],
        store: bool,
    ) -> Result<(f64, f64, usize, Option<ArrayFilteringResults>)> {
        let n = y.len();
        if n == 0 {
            return Err(SsfError::DataError("empty observation sequence".into()));
        }
        model.check_horizon(n)?;
        let init = model.initialization();
        if init.diffuse_dim() > 0 {
            return Err(SsfError::DiffuseInitialization(
                "array filter requires a finite initialization; \
                 use the augmented filter for diffuse models"
                    .into(),
            ));
        }
        let dim = model.dim();
        let r = model.noise_dim();

        // time-invariant pieces: W = S chol(Q)
        let w = {
            let mut s = DMatrix::zeros(dim, r);
            let mut q = DMatrix::zeros(r, r);
            model.dynamics().s_into(&mut s);
            model.dynamics().q_into(&mut q);
            let lq = psd_cholesky(&q, self.chol_tol)?;
            s * lq
        };

        let mut a = init.a0.clone();
        let mut l = psd_cholesky(&init.p0, self.chol_tol)?;

        let mut ssq = 0.0;
        let mut log_det = 0.0;
        let mut n_obs = 0usize;
        let mut results = store.then(|| ArrayFilteringResults {
            a: Vec::with_capacity(n),
            l: Vec::with_capacity(n),
            errors: Vec::with_capacity(n),
        });

        let mut work = DMatrix::zeros(1 + dim, 1 + dim + r);

        for t in 0..n {
            if let Some(res) = results.as_mut() {
                res.a.push(a.clone());
                res.l.push(l.clone());
            }

            let z = model.z_vector(t);
            let h = model.h(t);
            let tm = model.t_matrix(t);
            let missing = y[t].is_nan();

            let tl = &tm * &l;

            if missing {
                // prediction only: triangularize [T L | W]
                let mut block = DMatrix::zeros(dim, dim + r);
                block.view_mut((0, 0), (dim, dim)).copy_from(&tl);
                block.view_mut((0, dim), (dim, r)).copy_from(&w);
                fast_givens_triangularize(&mut block);
                let l_next = block.view((0, 0), (dim, dim)).into_owned();

                if let Some(res) = results.as_mut() {
                    let p = &l * l.transpose();
                    let cstar = &p * &z;
                    let f = z.dot(&cstar) + h;
                    res.errors.push(PredictionError {
                        e: 0.0,
                        f,
                        fi: 0.0,
                        cstar,
                        cinf: None,
                        missing: true,
                    });
                }
                model.dynamics().tx(t, &mut a);
                l = l_next;
                continue;
            }

            // populate the augmented block
            work.fill(0.0);
            work[(0, 0)] = h.sqrt();
            for j in 0..dim {
                let mut zl = 0.0;
                for i in 0..dim {
                    zl += z[i] * l[(i, j)];
                }
                work[(0, 1 + j)] = zl;
            }
            work.view_mut((1, 1), (dim, dim)).copy_from(&tl);
            work.view_mut((1, 1 + dim), (dim, r)).copy_from(&w);

            fast_givens_triangularize(&mut work);

            let sqrt_f = work[(0, 0)];
            let f = sqrt_f * sqrt_f;
            if f <= self.opts.zero_tol {
                return Err(SsfError::FilterDivergence { t, f });
            }

            let e = y[t] - z.dot(&a);
            ssq += e * e / f;
            log_det += f.ln();
            n_obs += 1;

            if let Some(res) = results.as_mut() {
                let p = &l * l.transpose();
                let cstar = &p * &z;
                res.errors.push(PredictionError {
                    e,
                    f,
                    fi: 0.0,
                    cstar,
                    cinf: None,
                    missing: false,
                });
            }

            // a_{t+1} = T a + kbar e/sqrt(F),  kbar = T P Z'/sqrt(F)
            model.dynamics().tx(t, &mut a);
            let scale = e / sqrt_f;
            for i in 0..dim {
                a[i] += work[(1 + i, 0)] * scale;
            }
            l = work.view((1, 1), (dim, dim)).into_owned();
        }

        Ok((ssq, log_det, n_obs, results))
    }
}

/// Time-invariant multivariate model for the multivariate array filter.
pub struct MultivariateModel {
    pub dynamics: Box<dyn Dynamics>,
    /// Loading matrix Z (n_obs x dim).
    pub z: DMatrix<f64>,
    /// Measurement-error covariance H (n_obs x n_obs).
    pub h: DMatrix<f64>,
    pub init: Initialization,
}

impl MultivariateModel {
    pub fn new(
        dynamics: Box<dyn Dynamics>,
        z: DMatrix<f64>,
        h: DMatrix<f64>,
        init: Initialization,
    ) -> Result<Self> {
        let dim = dynamics.dim();
        if z.ncols() != dim {
            return Err(SsfError::DimensionMismatch {
                what: "multivariate loading",
                expected: dim,
                got: z.ncols(),
            });
        }
        let m = z.nrows();
        if h.nrows() != m || h.ncols() != m {
            return Err(SsfError::DimensionMismatch {
                what: "measurement covariance",
                expected: m,
                got: h.nrows(),
            });
        }
        if init.a0.len() != dim || init.diffuse_dim() > 0 {
            return Err(SsfError::DiffuseInitialization(
                "multivariate array filter requires a finite initialization".into(),
            ));
        }
        Ok(Self {
            dynamics,
            z,
            h,
            init,
        })
    }

    pub fn obs_dim(&self) -> usize {
        self.z.nrows()
    }
}

/// Multivariate variant: the scalar sqrt(h) block generalizes to the
/// Cholesky factor of H, and the transformed errors are recovered by
/// triangular forward substitution instead of a scalar division.
pub struct MultivariateArrayFilter {
    opts: FilterOptions,
    chol_tol: f64,
}

impl Default for MultivariateArrayFilter {
    fn default() -> Self {
        Self {
            opts: FilterOptions::default(),
            chol_tol: 1e-13,
        }
    }
}

impl MultivariateArrayFilter {
    pub fn new(opts: FilterOptions, chol_tol: f64) -> Self {
        Self { opts, chol_tol }
    }

    pub fn likelihood(
        &self,
        model: &MultivariateModel,
        ys: &[DVector<f64>],
        concentrated: bool,
    ) -> Result<Likelihood> {
        let n = ys.len();
        if n == 0 {
            return Err(SsfError::DataError("empty observation sequence".into()));
        }
        let m = model.obs_dim();
        let dim = model.dynamics.dim();
        let r = model.dynamics.noise_dim();
        for yt in ys {
            if yt.len() != m {
                return Err(SsfError::DimensionMismatch {
                    what: "observation vector",
                    expected: m,
                    got: yt.len(),
                });
            }
        }

        let ch = psd_cholesky(&model.h, self.chol_tol)?;
        let w = {
            let mut s = DMatrix::zeros(dim, r);
            let mut q = DMatrix::zeros(r, r);
            model.dynamics.s_into(&mut s);
            model.dynamics.q_into(&mut q);
            s * psd_cholesky(&q, self.chol_tol)?
        };
        let mut tm = DMatrix::zeros(dim, dim);
        model.dynamics.t_into(0, &mut tm);

        let mut a = model.init.a0.clone();
        let mut l = psd_cholesky(&model.init.p0, self.chol_tol)?;

        let mut ssq = 0.0;
        let mut log_det = 0.0;
        let mut n_obs = 0usize;
        let mut work = DMatrix::zeros(m + dim, m + dim + r);

        for (t, yt) in ys.iter().enumerate() {
            let missing = yt.iter().any(|v| v.is_nan());
            let tl = &tm * &l;

            if missing {
                let mut block = DMatrix::zeros(dim, dim + r);
                block.view_mut((0, 0), (dim, dim)).copy_from(&tl);
                block.view_mut((0, dim), (dim, r)).copy_from(&w);
                fast_givens_triangularize(&mut block);
                l = block.view((0, 0), (dim, dim)).into_owned();
                model.dynamics.tx(t, &mut a);
                continue;
            }

            work.fill(0.0);
            work.view_mut((0, 0), (m, m)).copy_from(&ch);
            let zl = &model.z * &l;
            work.view_mut((0, m), (m, dim)).copy_from(&zl);
            work.view_mut((m, m), (dim, dim)).copy_from(&tl);
            work.view_mut((m, m + dim), (dim, r)).copy_from(&w);

            fast_givens_triangularize(&mut work);

            // top-left m x m block is now chol(F)
            let e = yt - &model.z * &a;
            let mut u = e.clone();
            for i in 0..m {
                let mut s = u[i];
                for k in 0..i {
                    s -= work[(i, k)] * u[k];
                }
                let g = work[(i, i)];
                if g * g <= self.opts.zero_tol {
                    return Err(SsfError::FilterDivergence { t, f: g * g });
                }
                u[i] = s / g;
                log_det += 2.0 * g.ln();
            }
            ssq += u.dot(&u);
            n_obs += m;

            // a_{t+1} = T a + Kbar u
            model.dynamics.tx(t, &mut a);
            for i in 0..dim {
                let mut s = 0.0;
                for k in 0..m {
                    s += work[(m + i, k)] * u[k];
                }
                a[i] += s;
            }
            l = work.view((m, m), (dim, dim)).into_owned();
        }

        Likelihood::from_parts(ssq, log_det, 0.0, n_obs, 0, concentrated)
    }
}
