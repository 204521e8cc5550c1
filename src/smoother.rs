//! Fixed-interval and disturbance smoothing.
//!
//! A backward recursion over the stored forward pass. The smoothing
//! residual r and its information matrix N run from t = n-1 down to 0,
//! seeded at zero; smoothed states, measurement noise and transition
//! disturbances all fall out of r, and their variances out of N. The
//! variance recursion doubles the cost, so it only runs when asked for.
//!
//! Models filtered with a diffuse initialization get the two-track
//! variant below the collapse point: a second residual r1 carries the
//! diffuse subspace until the recursion crosses back into the ordinary
//! region. Smoothed variances are not defined there and are reported
//! as absent for those steps.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};
use crate::filter::{FilterOptions, FilteringResults};
use crate::model::StateSpaceModel;

/// Backward-pass output. The disturbance vectors follow the state
/// equation a_{t+1} = T a_t + S eta_t, y_t = Z a_t + eps_t.
pub struct SmoothingResults {
    /// Smoothed states a_t | y_0..y_{n-1}.
    pub a: Vec<DVector<f64>>,
    /// Smoothed measurement noise (0 at missing steps).
    pub eps: Vec<f64>,
    /// Smoothed transition disturbances, one per step, noise_dim each.
    pub eta: Vec<DVector<f64>>,
    /// Smoothed state variances when requested; None before the
    /// diffuse collapse point.
    pub p: Option<Vec<Option<DMatrix<f64>>>>,
    /// Smoothed measurement-noise variances when requested.
    pub eps_var: Option<Vec<Option<f64>>>,
    /// Smoothed disturbance variances when requested.
    pub eta_var: Option<Vec<Option<DMatrix<f64>>>>,
}

impl SmoothingResults {
    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }
}

pub struct Smoother {
    opts: FilterOptions,
    variances: bool,
}

impl Default for Smoother {
    fn default() -> Self {
        Self {
            opts: FilterOptions::default(),
            variances: false,
        }
    }
}

impl Smoother {
    pub fn new(opts: FilterOptions) -> Self {
        Self {
            opts,
            variances: false,
        }
    }

    /// Also compute smoothed variances (doubles the backward-pass cost).
    pub fn with_variances(mut self, variances: bool) -> Self {
        self.variances = variances;
        self
    }

    pub fn smooth(
        &self,
        model: &StateSpaceModel,
        y: &[f64],
        filtered: &FilteringResults,
    ) -> Result<SmoothingResults> {
        let n = filtered.len();
        if n == 0 || y.len() != n {
            return Err(SsfError::DimensionMismatch {
                what: "smoother input length",
                expected: n,
                got: y.len(),
            });
        }
        let dim = model.dim();
        let nd = model.noise_dim();
        let collapse = filtered.collapse;

        // Q S', fixed for time-invariant dynamics
        let qst = {
            let mut s = DMatrix::zeros(dim, nd);
            let mut q = DMatrix::zeros(nd, nd);
            model.dynamics().s_into(&mut s);
            model.dynamics().q_into(&mut q);
            q * s.transpose()
        };

        let mut a_s = vec![DVector::zeros(dim); n];
        let mut eps = vec![0.0; n];
        let mut eta = vec![DVector::zeros(nd); n];
        let mut p_s = self.variances.then(|| vec![None; n]);
        let mut eps_var = self.variances.then(|| vec![None; n]);
        let mut eta_var = self.variances.then(|| vec![None; n]);

        let mut r = DVector::zeros(dim);
        let mut nmat = self.variances.then(|| DMatrix::zeros(dim, dim));
        // diffuse track, activated once the recursion drops below the
        // collapse point
        let mut r1: Option<DVector<f64>> = None;

        for t in (0..n).rev() {
            let err = &filtered.errors[t];
            let z = model.z_vector(t);
            let h = model.h(t);
            let diffuse_step = t < collapse;
            if diffuse_step && r1.is_none() {
                r1 = Some(DVector::zeros(dim));
            }

            // disturbances use the incoming r_t and N_t
            eta[t] = &qst * &r;
            if let (Some(ev), Some(nm)) = (eta_var.as_mut(), nmat.as_ref()) {
                if !diffuse_step {
                    let mut q = DMatrix::zeros(nd, nd);
                    model.dynamics().q_into(&mut q);
                    ev[t] = Some(&q - &qst * nm * qst.transpose());
                }
            }

            if !diffuse_step {
                if err.missing {
                    model.dynamics().xt(t, &mut r);
                    if let Some(nm) = nmat.as_mut() {
                        let tm = model.t_matrix(t);
                        *nm = tm.transpose() * &*nm * &tm;
                    }
                    if let Some(ev) = eps_var.as_mut() {
                        ev[t] = Some(h);
                    }
                } else {
                    // kbar = T P Z'/F
                    let mut kbar = &err.cstar / err.f;
                    model.dynamics().tx(t, &mut kbar);
                    let kr = kbar.dot(&r);
                    eps[t] = h * (err.e / err.f - kr);
                    if let (Some(ev), Some(nm)) = (eps_var.as_mut(), nmat.as_ref()) {
                        let knk = kbar.dot(&(&*nm * &kbar));
                        ev[t] = Some(h - h * h * (1.0 / err.f + knk));
                    }

                    // r_{t-1} = Z' e/F + L' r,  L = T - kbar Z'
                    model.dynamics().xt(t, &mut r);
                    r.axpy(err.e / err.f - kr, &z, 1.0);
                    if let Some(nm) = nmat.as_mut() {
                        let tm = model.t_matrix(t);
                        let mut l = tm;
                        l.ger(-1.0, &kbar, &z, 1.0);
                        *nm = l.transpose() * &*nm * &l;
                        nm.ger(1.0 / err.f, &z, &z, 1.0);
                        symmetrize(nm);
                    }
                }

                a_s[t] = &filtered.a[t] + &filtered.p[t] * &r;
                if let (Some(ps), Some(nm)) = (p_s.as_mut(), nmat.as_ref()) {
                    let p = &filtered.p[t];
                    let mut v = p - p * nm * p;
                    symmetrize(&mut v);
                    ps[t] = Some(v);
                }
            } else {
                let rr1 = r1.as_mut().ok_or(SsfError::DataError(
                    "diffuse smoothing track missing".into(),
                ))?;
                if err.missing {
                    model.dynamics().xt(t, &mut r);
                    model.dynamics().xt(t, rr1);
                } else if err.fi > self.opts.diffuse_tol {
                    let cinf = err.cinf.as_ref().ok_or_else(|| {
                        SsfError::DiffuseInitialization(
                            "diffuse step without stored diffuse covariance".into(),
                        )
                    })?;
                    let f1 = 1.0 / err.fi;
                    let f2 = -err.f * f1 * f1;

                    let mut k0 = cinf * f1;
                    model.dynamics().tx(t, &mut k0);
                    let mut k1 = &err.cstar * f1 + cinf * f2;
                    model.dynamics().tx(t, &mut k1);

                    let k0r0 = k0.dot(&r);
                    let k1r0 = k1.dot(&r);
                    let k0r1 = k0.dot(rr1);

                    // r1_{t-1} = Z' e/F-inf + L0' r1 + L1' r0
                    model.dynamics().xt(t, rr1);
                    rr1.axpy(err.e * f1 - k0r1 - k1r0, &z, 1.0);
                    // r0_{t-1} = L0' r0
                    model.dynamics().xt(t, &mut r);
                    r.axpy(-k0r0, &z, 1.0);
                } else {
                    // no diffuse information in this direction; the
                    // filter ran an ordinary update here
                    let mut kbar = &err.cstar / err.f;
                    model.dynamics().tx(t, &mut kbar);
                    let kr0 = kbar.dot(&r);
                    let kr1 = kbar.dot(rr1);
                    model.dynamics().xt(t, &mut r);
                    r.axpy(err.e / err.f - kr0, &z, 1.0);
                    model.dynamics().xt(t, rr1);
                    rr1.axpy(-kr1, &z, 1.0);
                }

                let pinf = filtered.pinf[t].as_ref().ok_or_else(|| {
                    SsfError::DiffuseInitialization(
                        "diffuse step without stored diffuse covariance".into(),
                    )
                })?;
                let rr1 = r1.as_ref().ok_or(SsfError::DataError(
                    "diffuse smoothing track missing".into(),
                ))?;
                a_s[t] = &filtered.a[t] + &filtered.p[t] * &r + pinf * rr1;
                if !err.missing {
                    eps[t] = y[t] - z.dot(&a_s[t]);
                }
            }
        }

        Ok(SmoothingResults {
            a: a_s,
            eps,
            eta,
            p: p_s,
            eps_var,
            eta_var,
        })
    }
}

/// State-only smoother: one backward pass for the residuals, then the
/// smoothed states are rolled forward through the transition equation.
/// Avoids keeping the full backward covariance history.
pub struct FastStateSmoother {
    opts: FilterOptions,
    /// Nudge the state toward the observation when the forward roll
    /// drifts; 0 disables the corrector.
    pub corrector_tol: f64,
}

impl Default for FastStateSmoother {
    fn default() -> Self {
        Self {
            opts: FilterOptions::default(),
            corrector_tol: 0.0,
        }
    }
}

impl FastStateSmoother {
    pub fn new(opts: FilterOptions, corrector_tol: f64) -> Self {
        Self {
            opts,
            corrector_tol,
        }
    }

    pub fn smooth(
        &self,
        model: &StateSpaceModel,
        y: &[f64],
        filtered: &FilteringResults,
    ) -> Result<Vec<DVector<f64>>> {
        let smoother = Smoother::new(self.opts);
        let n = filtered.len();
        if n == 0 || y.len() != n {
            return Err(SsfError::DimensionMismatch {
                what: "smoother input length",
                expected: n,
                got: y.len(),
            });
        }
        let dim = model.dim();
        let nd = model.noise_dim();

        // backward pass for disturbances and the first smoothed state
        let back = smoother.smooth(model, y, filtered)?;

        let mut s = DMatrix::zeros(dim, nd);
        model.dynamics().s_into(&mut s);

        let mut out = Vec::with_capacity(n);
        let mut a = back.a[0].clone();
        for t in 0..n {
            if t > 0 {
                model.dynamics().tx(t - 1, &mut a);
                a += &s * &back.eta[t - 1];
            }
            if self.corrector_tol > 0.0 && !y[t].is_nan() {
                let z = model.z_vector(t);
                let drift = (y[t] - back.eps[t]) - z.dot(&a);
                let zz = z.dot(&z);
                if drift.abs() > self.corrector_tol && zz > 0.0 {
                    // minimum-norm shift putting Z a back on the
                    // smoothed fit
                    a.axpy(drift / zz, &z, 1.0);
                }
            }
            out.push(a.clone());
        }
        Ok(out)
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
