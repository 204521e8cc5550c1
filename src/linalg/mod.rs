//! Dense linear-algebra primitives backing the filters.
//!
//! Storage and views come from nalgebra; the decompositions that need
//! filter-specific semantics (tolerances, redundant-column reporting,
//! orthogonal triangularization, compensated summation) live here.

pub mod accumulator;
pub mod cholesky;
pub mod givens;
pub mod householder;
pub mod lu;

pub use accumulator::{Accumulator, NaiveAccumulator, NeumaierAccumulator};
pub use cholesky::{cholesky_in_place, cholesky_solve, is_psd, lcholesky, psd_cholesky};
pub use givens::fast_givens_triangularize;
pub use householder::Householder;
pub use lu::{LuOptions, LuSolver};
