//! Composite model: a sum of independent components.
//!
//! Observation: y_t = sum_i Z_i a_i + eps. Dynamics are block diagonal,
//! loadings concatenate, initializations stack (diffuse bases included).
//! The composite aggregates the sub-model capability tables; there is no
//! inheritance chain, just another `Dynamics`/`Loading` pair.

use nalgebra::{DMatrix, DVector};

use crate::error::Result;
use crate::model::{Dynamics, Initialization, Loading, StateSpaceModel};

struct Part {
    dynamics: Box<dyn Dynamics>,
    state_offset: usize,
    noise_offset: usize,
}

pub struct CompositeDynamics {
    parts: Vec<Part>,
    dim: usize,
    noise_dim: usize,
}

impl Dynamics for CompositeDynamics {
    fn dim(&self) -> usize {
        self.dim
    }

    fn noise_dim(&self) -> usize {
        self.noise_dim
    }

    fn time_invariant(&self) -> bool {
        self.parts.iter().all(|p| p.dynamics.time_invariant())
    }

    fn t_into(&self, t: usize, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        for part in &self.parts {
            let n = part.dynamics.dim();
            let mut block = DMatrix::zeros(n, n);
            part.dynamics.t_into(t, &mut block);
            let o = part.state_offset;
            for i in 0..n {
                for j in 0..n {
                    out[(o + i, o + j)] = block[(i, j)];
                }
            }
        }
    }

    fn s_into(&self, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        for part in &self.parts {
            let n = part.dynamics.dim();
            let r = part.dynamics.noise_dim();
            if r == 0 {
                continue;
            }
            let mut block = DMatrix::zeros(n, r);
            part.dynamics.s_into(&mut block);
            for i in 0..n {
                for j in 0..r {
                    out[(part.state_offset + i, part.noise_offset + j)] = block[(i, j)];
                }
            }
        }
    }

    fn q_into(&self, out: &mut DMatrix<f64>) {
        out.fill(0.0);
        for part in &self.parts {
            let r = part.dynamics.noise_dim();
            if r == 0 {
                continue;
            }
            let mut block = DMatrix::zeros(r, r);
            part.dynamics.q_into(&mut block);
            let o = part.noise_offset;
            for i in 0..r {
                for j in 0..r {
                    out[(o + i, o + j)] = block[(i, j)];
                }
            }
        }
    }

    fn tx(&self, t: usize, x: &mut DVector<f64>) {
        for part in &self.parts {
            let n = part.dynamics.dim();
            let o = part.state_offset;
            let mut seg = DVector::from_fn(n, |i, _| x[o + i]);
            part.dynamics.tx(t, &mut seg);
            for i in 0..n {
                x[o + i] = seg[i];
            }
        }
    }

    fn xt(&self, t: usize, x: &mut DVector<f64>) {
        for part in &self.parts {
            let n = part.dynamics.dim();
            let o = part.state_offset;
            let mut seg = DVector::from_fn(n, |i, _| x[o + i]);
            part.dynamics.xt(t, &mut seg);
            for i in 0..n {
                x[o + i] = seg[i];
            }
        }
    }

    fn add_noise_cov(&self, t: usize, p: &mut DMatrix<f64>) {
        for part in &self.parts {
            let n = part.dynamics.dim();
            let o = part.state_offset;
            let mut block = DMatrix::from_fn(n, n, |i, j| p[(o + i, o + j)]);
            part.dynamics.add_noise_cov(t, &mut block);
            for i in 0..n {
                for j in 0..n {
                    p[(o + i, o + j)] = block[(i, j)];
                }
            }
        }
    }
}

pub struct CompositeLoading {
    loadings: Vec<(Box<dyn Loading>, usize)>,
    dim: usize,
}

impl Loading for CompositeLoading {
    fn dim(&self) -> usize {
        self.dim
    }

    fn time_invariant(&self) -> bool {
        self.loadings.iter().all(|(l, _)| l.time_invariant())
    }

    fn z_into(&self, t: usize, out: &mut DVector<f64>) {
        out.fill(0.0);
        for (loading, offset) in &self.loadings {
            let n = loading.dim();
            let mut seg = DVector::zeros(n);
            loading.z_into(t, &mut seg);
            for i in 0..n {
                out[offset + i] = seg[i];
            }
        }
    }

    // the shortest component horizon bounds the composite
    fn horizon(&self) -> Option<usize> {
        self.loadings.iter().filter_map(|(l, _)| l.horizon()).min()
    }
}

/// Builds a composite model out of (dynamics, loading, initialization)
/// triples, one per component.
#[derive(Default)]
pub struct CompositeModel {
    dynamics: Vec<Box<dyn Dynamics>>,
    loadings: Vec<Box<dyn Loading>>,
    inits: Vec<Initialization>,
}

impl CompositeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        mut self,
        dynamics: Box<dyn Dynamics>,
        loading: Box<dyn Loading>,
        init: Initialization,
    ) -> Self {
        self.dynamics.push(dynamics);
        self.loadings.push(loading);
        self.inits.push(init);
        self
    }

    pub fn build(self) -> Result<StateSpaceModel> {
        let dim: usize = self.dynamics.iter().map(|d| d.dim()).sum();
        let noise_dim: usize = self.dynamics.iter().map(|d| d.noise_dim()).sum();
        let diffuse_dim: usize = self.inits.iter().map(|i| i.diffuse_dim()).sum();

        let mut a0 = DVector::zeros(dim);
        let mut p0 = DMatrix::zeros(dim, dim);
        let mut b = DMatrix::zeros(dim, diffuse_dim);

        let mut parts = Vec::with_capacity(self.dynamics.len());
        let mut loadings = Vec::with_capacity(self.loadings.len());
        let mut state_offset = 0;
        let mut noise_offset = 0;
        let mut diffuse_offset = 0;

        for ((dynamics, loading), init) in self
            .dynamics
            .into_iter()
            .zip(self.loadings.into_iter())
            .zip(self.inits.into_iter())
        {
            let n = dynamics.dim();
            let r = dynamics.noise_dim();
            for i in 0..n {
                a0[state_offset + i] = init.a0[i];
                for j in 0..n {
                    p0[(state_offset + i, state_offset + j)] = init.p0[(i, j)];
                }
                for j in 0..init.diffuse_dim() {
                    b[(state_offset + i, diffuse_offset + j)] = init.b[(i, j)];
                }
            }
            diffuse_offset += init.diffuse_dim();
            loadings.push((loading, state_offset));
            parts.push(Part {
                noise_offset,
                state_offset,
                dynamics,
            });
            state_offset += n;
            noise_offset += r;
        }

        StateSpaceModel::new(
            Box::new(CompositeDynamics {
                parts,
                dim,
                noise_dim,
            }),
            Box::new(CompositeLoading { loadings, dim }),
            Initialization::partially_diffuse(a0, p0, b),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::structural::{Ar1, LocalLevel, UnitLoading};

    fn level_plus_ar1() -> StateSpaceModel {
        CompositeModel::new()
            .add(
                Box::new(LocalLevel { var: 0.5 }),
                Box::new(UnitLoading::new(1, 0)),
                Initialization::diffuse(1),
            )
            .add(
                Box::new(Ar1 { rho: 0.7, var: 1.0 }),
                Box::new(UnitLoading::new(1, 0)),
                Initialization::stationary(
                    DVector::zeros(1),
                    DMatrix::from_element(1, 1, 1.0 / (1.0 - 0.49)),
                ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_composite_dims_and_init() {
        let m = level_plus_ar1();
        assert_eq!(m.dim(), 2);
        assert_eq!(m.noise_dim(), 2);
        assert_eq!(m.initialization().diffuse_dim(), 1);
        // diffuse basis hits the level state only
        assert_eq!(m.initialization().b[(0, 0)], 1.0);
        assert_eq!(m.initialization().b[(1, 0)], 0.0);
        // AR(1) stationary variance in the finite part
        assert!((m.initialization().p0[(1, 1)] - 1.0 / 0.51).abs() < 1e-12);
    }

    #[test]
    fn test_composite_loading_concatenates() {
        let m = level_plus_ar1();
        let z = m.z_vector(0);
        assert_eq!(z[0], 1.0);
        assert_eq!(z[1], 1.0);
    }

    #[test]
    fn test_composite_transition_is_block_diagonal() {
        let m = level_plus_ar1();
        let t = m.t_matrix(3);
        assert_eq!(t[(0, 0)], 1.0);
        assert!((t[(1, 1)] - 0.7).abs() < 1e-15);
        assert_eq!(t[(0, 1)], 0.0);
        assert_eq!(t[(1, 0)], 0.0);
    }

    #[test]
    fn test_composite_tx_matches_materialized() {
        let m = level_plus_ar1();
        let t = m.t_matrix(0);
        let x0 = DVector::from_row_slice(&[2.0, -1.0]);
        let mut x = x0.clone();
        m.dynamics().tx(0, &mut x);
        assert!((x - &t * x0).norm() < 1e-14);
    }

    #[test]
    fn test_composite_noise_cov_blocks() {
        let m = level_plus_ar1();
        let mut p = DMatrix::zeros(2, 2);
        m.dynamics().add_noise_cov(0, &mut p);
        assert!((p[(0, 0)] - 0.5).abs() < 1e-15);
        assert!((p[(1, 1)] - 1.0).abs() < 1e-15);
        assert_eq!(p[(0, 1)], 0.0);
    }
}
