//! Augmented Kalman filter for diffuse initial conditions.
//!
//! Instead of carrying an explicitly infinite covariance, the diffuse
//! part of the initial state is written as B delta with delta unknown.
//! The augmentation matrix B is pushed through the same T and Z
//! operators as the state, and the cross products of Z B with the
//! innovations are collected in a running GLS accumulator. At the
//! first step where that accumulator becomes positive definite the
//! generalized least-squares estimate of delta is folded back into the
//! ordinary state and the recursion continues as a plain Kalman filter.
//!
//! This is the practical route for models whose diffuse directions are
//! regression-like (unknown fixed coefficients), and it yields three
//! likelihood flavors that differ only in how delta is integrated out.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{Result, SsfError};
use crate::filter::{FilterOptions, FilteringResults, KalmanFilter};
use crate::likelihood::Likelihood;
use crate::linalg::cholesky::{cholesky_solve, lcholesky};
use crate::model::StateSpaceModel;

/// How the diffuse coefficients delta enter the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikelihoodFlavor {
    /// Integrate delta out with a flat prior; adds the log determinant
    /// of the GLS information matrix to the correction term.
    Diffuse,
    /// Plug in the GLS estimate of delta and treat it as known.
    Profile,
    /// Diffuse likelihood rescaled by the unweighted cross-product
    /// determinant, invariant to linear reparameterizations of delta.
    Marginal,
}

pub struct AugmentedFilter {
    opts: FilterOptions,
    chol_tol: f64,
}

impl Default for AugmentedFilter {
    fn default() -> Self {
        Self {
            opts: FilterOptions::default(),
            chol_tol: 1e-13,
        }
    }
}

struct Augmentation {
    /// State augmentation, dim x d.
    b: DMatrix<f64>,
    /// Weighted information matrix sum (Z B)'(Z B)/F.
    s: DMatrix<f64>,
    /// Weighted cross product sum (Z B)' e/F.
    sv: DVector<f64>,
    /// Unweighted information matrix, kept for the marginal flavor.
    m: DMatrix<f64>,
    ssq: f64,
    steps: usize,
}

struct Collapse {
    /// First ordinary step after the augmentation was resolved.
    position: usize,
    /// ssq of the pre-collapse innovations after the GLS correction.
    ssq: f64,
    log_det_s: f64,
    log_det_m: f64,
}

impl AugmentedFilter {
    pub fn new(opts: FilterOptions, chol_tol: f64) -> Self {
        Self { opts, chol_tol }
    }

    pub fn likelihood(
        &self,
        model: &StateSpaceModel,
        y: &[f64],
        flavor: LikelihoodFlavor,
    ) -> Result<Likelihood> {
        let (acc, collapse) = self.run(model, y)?;
        let d = model.initialization().diffuse_dim();
        let c = match collapse {
            Some(c) => c,
            None if d == 0 => Collapse {
                position: 0,
                ssq: 0.0,
                log_det_s: 0.0,
                log_det_m: 0.0,
            },
            None => {
                return Err(SsfError::DiffuseInitialization(
                    "diffuse directions are not identified by the data".into(),
                ))
            }
        };
        let ssq = c.ssq + acc.ssq;
        let (correction, df_lost) = match flavor {
            LikelihoodFlavor::Profile => (0.0, 0),
            LikelihoodFlavor::Diffuse => (c.log_det_s, d),
            // marginal = diffuse + (log det M - log det S)/2
            LikelihoodFlavor::Marginal => (2.0 * c.log_det_s - c.log_det_m, d),
        };
        Likelihood::from_parts(ssq, acc.log_det, correction, acc.n_obs, df_lost, false)
    }

    /// Forward-pass history for smoothing.
    ///
    /// The history is reported in the exact-initialization form (the
    /// finite/diffuse covariance split with its own collapse index), so
    /// the backward smoothing pass yields the same smoothed moments
    /// whichever filter computed the likelihood. The augmented pass
    /// still runs first, and an unidentified diffuse direction fails
    /// here the same way it fails in `likelihood`.
    pub fn filter(&self, model: &StateSpaceModel, y: &[f64]) -> Result<FilteringResults> {
        if model.initialization().diffuse_dim() > 0 {
            let (_, collapse) = self.run(model, y)?;
            if collapse.is_none() {
                return Err(SsfError::DiffuseInitialization(
                    "diffuse directions are not identified by the data".into(),
                ));
            }
        }
        KalmanFilter::new(self.opts).filter(model, y)
    }

    pub fn collapsing_position(&self, model: &StateSpaceModel, y: &[f64]) -> Result<usize> {
        let (_, collapse) = self.run(model, y)?;
        match collapse {
            Some(c) => Ok(c.position),
            None if model.initialization().diffuse_dim() == 0 => Ok(0),
            None => Err(SsfError::DiffuseInitialization(
                "diffuse directions are not identified by the data".into(),
            )),
        }
    }

    fn run(
        &self,
        model: &StateSpaceModel,
        y: &[f64],
    ) -> Result<(OrdinaryAccumulators, Option<Collapse>)> {
        let n = y.len();
        if n == 0 {
            return Err(SsfError::DataError("empty observation sequence".into()));
        }
        model.check_horizon(n)?;
        let dim = model.dim();
        let init = model.initialization();
        let d = init.diffuse_dim();

        let mut a = init.a0.clone();
        let mut p = init.p0.clone();
        let mut aug = (d > 0).then(|| Augmentation {
            b: init.b.clone(),
            s: DMatrix::zeros(d, d),
            sv: DVector::zeros(d),
            m: DMatrix::zeros(d, d),
            ssq: 0.0,
            steps: 0,
        });

        let mut acc = OrdinaryAccumulators {
            ssq: 0.0,
            log_det: 0.0,
            n_obs: 0,
        };
        let mut collapse: Option<Collapse> = None;

        for t in 0..n {
            let z = model.z_vector(t);
            let h = model.h(t);

            if !y[t].is_nan() {
                let cstar = &p * &z;
                let f = z.dot(&cstar) + h;
                if f <= self.opts.zero_tol {
                    return Err(SsfError::FilterDivergence { t, f });
                }
                let e = y[t] - z.dot(&a);
                acc.log_det += f.ln();
                acc.n_obs += 1;

                let k = &cstar / f;
                match aug.as_mut() {
                    Some(g) => {
                        // v = Z B, the diffuse footprint of this innovation
                        let v = g.b.tr_mul(&z);
                        g.s.syger(1.0 / f, &v, &v, 1.0);
                        g.sv.axpy(e / f, &v, 1.0);
                        g.m.syger(1.0, &v, &v, 1.0);
                        g.ssq += e * e / f;
                        g.steps += 1;

                        // B <- B - K (Z B)
                        g.b.ger(-1.0, &k, &v, 1.0);
                    }
                    None => acc.ssq += e * e / f,
                }

                a.axpy(e, &k, 1.0);
                joseph_update(&mut p, &k, &z, h);
            }

            // try to resolve the augmentation once enough information
            // has accumulated
            let mut resolved = false;
            if let Some(g) = aug.as_ref() {
                if g.steps >= d {
                    if let Ok(ls) = lcholesky(&g.s, self.chol_tol) {
                        let delta = cholesky_solve(&ls, &g.sv)?;
                        debug!(t, d, "augmentation collapsed");

                        a += &g.b * &delta;
                        // P <- P + B S^-1 B'
                        let mut binv = g.b.transpose();
                        for j in 0..dim {
                            let mut col = binv.column(j).into_owned();
                            crate::linalg::cholesky::solve_lower_in_place(&ls, &mut col)?;
                            crate::linalg::cholesky::solve_lower_transpose_in_place(
                                &ls, &mut col,
                            )?;
                            binv.set_column(j, &col);
                        }
                        p += &g.b * binv;

                        let log_det_s = 2.0 * (0..d).map(|i| ls[(i, i)].ln()).sum::<f64>();
                        let log_det_m = {
                            let lm = lcholesky(&g.m, self.chol_tol)?;
                            2.0 * (0..d).map(|i| lm[(i, i)].ln()).sum::<f64>()
                        };
                        collapse = Some(Collapse {
                            position: t + 1,
                            ssq: g.ssq - g.sv.dot(&delta),
                            log_det_s,
                            log_det_m,
                        });
                        resolved = true;
                    }
                }
            }
            if resolved {
                aug = None;
            }

            // predict
            let tm = model.t_matrix(t);
            model.dynamics().tx(t, &mut a);
            if let Some(g) = aug.as_mut() {
                g.b = &tm * &g.b;
            }
            p = &tm * &p * tm.transpose();
            model.dynamics().add_noise_cov(t, &mut p);
            symmetrize(&mut p);
        }

        Ok((acc, collapse))
    }
}

struct OrdinaryAccumulators {
    ssq: f64,
    log_det: f64,
    n_obs: usize,
}

fn joseph_update(p: &mut DMatrix<f64>, k: &DVector<f64>, z: &DVector<f64>, h: f64) {
    let dim = p.nrows();
    let mut ikz = DMatrix::identity(dim, dim);
    ikz.ger(-1.0, k, z, 1.0);
    *p = &ikz * &*p * ikz.transpose();
    p.ger(h, k, k, 1.0);
    symmetrize(p);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::KalmanFilter;
    use crate::models::structural::{LocalLevel, LocalLinearTrend};

    #[test]
    fn test_agrees_with_exact_diffuse_filter() {
        let model = LocalLevel::model(0.5)
            .unwrap()
            .with_measurement_error(0.4)
            .unwrap();
        let y = [1.0, 1.4, 0.9, 1.2, 1.1, 0.8, 1.3];
        let ll_exact = KalmanFilter::default()
            .likelihood(&model, &y, false)
            .unwrap();
        let ll_akf = AugmentedFilter::default()
            .likelihood(&model, &y, LikelihoodFlavor::Diffuse)
            .unwrap();
        let rel = (ll_exact.log_likelihood - ll_akf.log_likelihood).abs()
            / ll_exact.log_likelihood.abs();
        assert!(rel < 1e-9, "relative diff {}", rel);
    }

    #[test]
    fn test_collapse_within_diffuse_dim_steps() {
        let model = LocalLinearTrend::model(0.3, 0.1)
            .unwrap()
            .with_measurement_error(0.2)
            .unwrap();
        let y = [2.0, 2.5, 3.1, 3.4, 4.0, 4.3];
        let pos = AugmentedFilter::default()
            .collapsing_position(&model, &y)
            .unwrap();
        assert!(pos <= model.initialization().diffuse_dim());
    }

    #[test]
    fn test_flavors_are_ordered_corrections() {
        let model = LocalLinearTrend::model(0.3, 0.1)
            .unwrap()
            .with_measurement_error(0.2)
            .unwrap();
        let y = [2.0, 2.5, 3.1, 3.4, 4.0, 4.3, 5.1, 5.0];
        let akf = AugmentedFilter::default();
        let diff = akf
            .likelihood(&model, &y, LikelihoodFlavor::Diffuse)
            .unwrap();
        let prof = akf
            .likelihood(&model, &y, LikelihoodFlavor::Profile)
            .unwrap();
        let marg = akf
            .likelihood(&model, &y, LikelihoodFlavor::Marginal)
            .unwrap();
        // the three flavors share the residual sum of squares
        assert!((diff.ssq - prof.ssq).abs() < 1e-12);
        assert!((diff.ssq - marg.ssq).abs() < 1e-12);
        // and differ only through their correction terms
        assert!(diff.log_likelihood.is_finite());
        assert!(prof.log_likelihood.is_finite());
        assert!(marg.log_likelihood.is_finite());
        assert!((prof.log_likelihood - diff.log_likelihood).abs() > 1e-12);
    }

    #[test]
    fn test_history_smoothing_matches_exact_diffuse() {
        // smoothed states are conditional expectations; the stored
        // history must smooth to the same values whichever forward
        // pass produced it
        let model = LocalLinearTrend::model(0.3, 0.1)
            .unwrap()
            .with_measurement_error(0.2)
            .unwrap();
        let y = [
            2.0, 2.5, 3.1, 3.4, 4.0, 4.3, 5.1, 5.0, 5.6, 6.2, 6.1, 6.8,
        ];
        let kf_hist = KalmanFilter::default().filter(&model, &y).unwrap();
        let akf_hist = AugmentedFilter::default().filter(&model, &y).unwrap();
        assert_eq!(kf_hist.collapse, akf_hist.collapse);

        let sm = crate::smoother::Smoother::default();
        let from_kf = sm.smooth(&model, &y, &kf_hist).unwrap();
        let from_akf = sm.smooth(&model, &y, &akf_hist).unwrap();
        for t in 0..y.len() {
            for i in 0..model.dim() {
                assert!(
                    (from_kf.a[t][i] - from_akf.a[t][i]).abs() < 1e-9,
                    "t={} i={}",
                    t,
                    i
                );
            }
        }
    }

    #[test]
    fn test_no_diffuse_part_reduces_to_ordinary() {
        let model = crate::models::structural::Ar1::model(0.6, 1.0).unwrap();
        let y = [0.2, -0.4, 0.7, 0.1, -0.3];
        let ll_ord = KalmanFilter::default()
            .likelihood(&model, &y, false)
            .unwrap();
        let ll_akf = AugmentedFilter::default()
            .likelihood(&model, &y, LikelihoodFlavor::Diffuse)
            .unwrap();
        assert!((ll_ord.log_likelihood - ll_akf.log_likelihood).abs() < 1e-10);
        assert_eq!(
            AugmentedFilter::default()
                .collapsing_position(&model, &y)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_unidentified_diffuse_fails() {
        // a regression on an all-zero column never pins down its
        // coefficient
        let x = nalgebra::DMatrix::zeros(4, 1);
        let model = crate::models::regression::Regression::model(x)
            .unwrap()
            .with_measurement_error(1.0)
            .unwrap();
        let y = [1.0, 2.0, 3.0, 4.0];
        assert!(matches!(
            AugmentedFilter::default().likelihood(&model, &y, LikelihoodFlavor::Diffuse),
            Err(SsfError::DiffuseInitialization(_))
        ));
    }
}
