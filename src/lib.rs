//! Linear Gaussian state-space filtering and smoothing.
//!
//! Models of the form `a_{t+1} = T a_t + S u_t`, `y_t = Z a_t + eps_t`
//! with the Kalman filter family built on top: the ordinary filter with
//! exact diffuse initialization, the augmented filter for diffuse
//! regression effects, the array (square-root) filter for numerically
//! hard covariances, and fixed-interval/disturbance smoothing. Ready
//! model builders cover AR(1), local level, local linear trend,
//! seasonal dummies, ARMA in companion form, regression effects and
//! block-diagonal composites of those.
//!
//! Observations are scalar `f64` with `NaN` marking a missing value;
//! missing steps predict but never update. Likelihoods come from the
//! prediction-error decomposition, optionally with the scale
//! concentrated out.

pub mod error;
pub mod linalg;
pub mod polynomial;
pub mod model;
pub mod models;
pub mod likelihood;
pub mod filter;
pub mod akf;
pub mod array;
pub mod smoother;
pub mod batch;

pub use crate::akf::{AugmentedFilter, LikelihoodFlavor};
pub use crate::array::{ArrayFilter, MultivariateArrayFilter, MultivariateModel};
pub use crate::error::{Result, SsfError};
pub use crate::filter::{FilterOptions, FilteringResults, KalmanFilter};
pub use crate::likelihood::Likelihood;
pub use crate::model::{Initialization, StateSpaceModel};
pub use crate::smoother::{FastStateSmoother, Smoother, SmoothingResults};
