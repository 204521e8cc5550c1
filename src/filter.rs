//! Ordinary and exact-diffuse Kalman filter.
//!
//! Forward recursion over t = 0..n-1 with the prediction-error
//! decomposition of the Gaussian likelihood. A model with diffuse
//! dimension d > 0 starts in diffuse mode: the covariance is split into
//! a finite part P* and a diffuse part P-inf, prediction errors along
//! diffuse directions contribute a separate log-determinant term, and
//! the filter behaves as the ordinary filter once P-inf has collapsed
//! to zero. A NaN observation skips the update and keeps the predicted
//! state trajectory.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{Result, SsfError};
use crate::likelihood::Likelihood;
use crate::model::StateSpaceModel;

#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    /// Threshold under which a prediction-error variance counts as zero.
    pub zero_tol: f64,
    /// Threshold under which the diffuse variance F-inf counts as zero.
    pub diffuse_tol: f64,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            zero_tol: 1e-12,
            diffuse_tol: 1e-8,
        }
    }
}

/// Per-step innovation record.
#[derive(Debug, Clone)]
pub struct PredictionError {
    /// Innovation e_t = y_t - Z a_t (0 when missing).
    pub e: f64,
    /// Finite prediction-error variance F* = Z P* Z' + h.
    pub f: f64,
    /// Diffuse variance F-inf = Z P-inf Z' (0 once collapsed).
    pub fi: f64,
    /// Covariance vector P* Z'.
    pub cstar: DVector<f64>,
    /// Covariance vector P-inf Z' while in the diffuse phase.
    pub cinf: Option<DVector<f64>>,
    pub missing: bool,
}

impl PredictionError {
    /// Kalman gain K_t = P Z'/F of the ordinary update.
    pub fn gain(&self) -> DVector<f64> {
        &self.cstar / self.f
    }

    /// Whether this step was handled by the diffuse recursion.
    pub fn diffuse(&self) -> bool {
        self.fi > 0.0
    }
}

/// Stored forward pass: predicted states/covariances plus the
/// innovation stream, read-only input to the smoothers.
pub struct FilteringResults {
    /// Predicted state a_{t|t-1}.
    pub a: Vec<DVector<f64>>,
    /// Predicted finite covariance P*_{t|t-1}.
    pub p: Vec<DMatrix<f64>>,
    /// Predicted diffuse covariance while in the diffuse phase.
    pub pinf: Vec<Option<DMatrix<f64>>>,
    pub errors: Vec<PredictionError>,
    /// First time index at which the filter runs ordinarily
    /// (0 for a model without diffuse initialization).
    pub collapse: usize,
}

impl FilteringResults {
    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }
}

fn symmetrize(p: &mut DMatrix<f64>) {
    let n = p.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (p[(i, j)] + p[(j, i)]);
            p[(i, j)] = v;
            p[(j, i)] = v;
        }
    }
}

struct Accumulators {
    ssq: f64,
    log_det: f64,
    diffuse_correction: f64,
    n_obs: usize,
    diffuse_steps: usize,
}

pub struct KalmanFilter {
    opts: FilterOptions,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(FilterOptions::default())
    }
}

impl KalmanFilter {
    pub fn new(opts: FilterOptions) -> Self {
        Self { opts }
    }

    /// Log-likelihood of `y` under `model` (no history kept).
    pub fn likelihood(
        &self,
        model: &StateSpaceModel,
        y: &[f64],
        concentrated: bool,
    ) -> Result<Likelihood> {
        let (acc, _) = self.run(model, y, false)?;
        Likelihood::from_parts(
            acc.ssq,
            acc.log_det,
            acc.diffuse_correction,
            acc.n_obs + acc.diffuse_steps,
            acc.diffuse_steps,
            concentrated,
        )
    }

    /// Full forward pass with stored history, for smoothing.
    pub fn filter(&self, model: &StateSpaceModel, y: &[f64]) -> Result<FilteringResults> {
        let (_, results) = self.run(model, y, true)?;
        Ok(results.expect("history requested"))
    }

    fn run(
        &self,
        model: &StateSpaceModel,
        y: &[f64],
        store: bool,
    ) -> Result<(Accumulators, Option<FilteringResults>)> {
        let n = y.len();
        if n == 0 {
            return Err(SsfError::DataError("empty observation sequence".into()));
        }
        model.check_horizon(n)?;

        let init = model.initialization();
        let mut a = init.a0.clone();
        let mut pstar = init.p0.clone();
        let mut pinf = if init.diffuse_dim() > 0 {
            Some(init.diffuse_cov())
        } else {
            None
        };

        let mut acc = Accumulators {
            ssq: 0.0,
            log_det: 0.0,
            diffuse_correction: 0.0,
            n_obs: 0,
            diffuse_steps: 0,
        };
        let mut results = store.then(|| FilteringResults {
            a: Vec::with_capacity(n),
            p: Vec::with_capacity(n),
            pinf: Vec::with_capacity(n),
            errors: Vec::with_capacity(n),
            collapse: 0,
        });
        let mut collapse = 0usize;

        for t in 0..n {
            if let Some(r) = results.as_mut() {
                r.a.push(a.clone());
                r.p.push(pstar.clone());
                r.pinf.push(pinf.clone());
            }

            let z = model.z_vector(t);
            let h = model.h(t);
            let missing = y[t].is_nan();

            let cstar = &pstar * &z;
            let fstar = z.dot(&cstar) + h;

            let err = if let Some(pi) = pinf.as_mut() {
                let cinf = &*pi * &z;
                let fi = z.dot(&cinf);

                if missing {
                    PredictionError {
                        e: 0.0,
                        f: fstar,
                        fi,
                        cstar,
                        cinf: Some(cinf),
                        missing: true,
                    }
                } else if fi > self.opts.diffuse_tol {
                    let e = y[t] - z.dot(&a);
                    // exact diffuse update (univariate)
                    a += &cinf * (e / fi);
                    let ratio = fstar / (fi * fi);
                    pstar += &cinf * cinf.transpose() * ratio;
                    pstar -= (&cstar * cinf.transpose() + &cinf * cstar.transpose()) / fi;
                    *pi -= &cinf * cinf.transpose() / fi;
                    symmetrize(&mut pstar);
                    symmetrize(pi);

                    acc.diffuse_correction += fi.ln();
                    acc.diffuse_steps += 1;

                    PredictionError {
                        e,
                        f: fstar,
                        fi,
                        cstar,
                        cinf: Some(cinf),
                        missing: false,
                    }
                } else {
                    // diffuse direction orthogonal to Z: ordinary update
                    if fstar <= self.opts.zero_tol {
                        return Err(SsfError::FilterDivergence { t, f: fstar });
                    }
                    let e = y[t] - z.dot(&a);
                    let k = &cstar / fstar;
                    a += &k * e;
                    joseph_update(&mut pstar, &k, &z, h);
                    acc.ssq += e * e / fstar;
                    acc.log_det += fstar.ln();
                    acc.n_obs += 1;

                    PredictionError {
                        e,
                        f: fstar,
                        fi: 0.0,
                        cstar,
                        cinf: Some(cinf),
                        missing: false,
                    }
                }
            } else if missing {
                PredictionError {
                    e: 0.0,
                    f: fstar,
                    fi: 0.0,
                    cstar,
                    cinf: None,
                    missing: true,
                }
            } else {
                if fstar <= self.opts.zero_tol {
                    return Err(SsfError::FilterDivergence { t, f: fstar });
                }
                let e = y[t] - z.dot(&a);
                let k = &cstar / fstar;
                a += &k * e;
                joseph_update(&mut pstar, &k, &z, h);
                acc.ssq += e * e / fstar;
                acc.log_det += fstar.ln();
                acc.n_obs += 1;

                PredictionError {
                    e,
                    f: fstar,
                    fi: 0.0,
                    cstar,
                    cinf: None,
                    missing: false,
                }
            };
            if let Some(r) = results.as_mut() {
                r.errors.push(err);
            }

            // collapse check: diffuse part exhausted
            if let Some(pi) = pinf.as_ref() {
                if pi.amax() < self.opts.diffuse_tol {
                    debug!(t, steps = acc.diffuse_steps, "diffuse dimension collapsed");
                    pinf = None;
                    collapse = t + 1;
                }
            }

            // predict t+1
            let tm = model.t_matrix(t);
            model.dynamics().tx(t, &mut a);
            pstar = &tm * &pstar * tm.transpose();
            model.dynamics().add_noise_cov(t, &mut pstar);
            symmetrize(&mut pstar);
            if let Some(pi) = pinf.as_mut() {
                *pi = &tm * &*pi * tm.transpose();
                symmetrize(pi);
            }
        }

        if pinf.is_some() {
            return Err(SsfError::DiffuseInitialization(format!(
                "diffuse dimension failed to collapse within {} observations",
                n
            )));
        }
        if let Some(r) = results.as_mut() {
            r.collapse = collapse;
        }
        Ok((acc, results))
    }
}

/// Joseph-form covariance update:
/// P <- (I - K Z') P (I - K Z')' + h K K'.
fn joseph_update(p: &mut DMatrix<f64>, k: &DVector<f64>, z: &DVector<f64>, h: f64) {
    let n = p.nrows();
    let eye = DMatrix::<f64>::identity(n, n);
    let i_kz = &eye - k * z.transpose();
    *p = &i_kz * &*p * i_kz.transpose();
    if h > 0.0 {
        *p += k * k.transpose() * h;
    }
    symmetrize(p);
}
