//! Rayon-based parallel batch evaluation.
//!
//! A single filter pass is a sequential recursion, so parallelism lives
//! across independent passes: many candidate models evaluated on one
//! series (a likelihood surface scan) or one model evaluated on many
//! series. Each evaluation owns its run state, so the passes share only
//! the immutable model and data.

use rayon::prelude::*;

use crate::error::Result;
use crate::filter::KalmanFilter;
use crate::likelihood::Likelihood;
use crate::model::StateSpaceModel;
use crate::smoother::{Smoother, SmoothingResults};

/// Evaluate one model on multiple series in parallel.
///
/// A failed evaluation (for instance a divergent pass) is reported per
/// series, not propagated, so an optimizer scanning parameter points
/// can treat the failure as an infeasible point and move on.
pub fn parallel_series(
    model: &StateSpaceModel,
    series: &[Vec<f64>],
    concentrated: bool,
) -> Vec<Result<Likelihood>> {
    series
        .par_iter()
        .map(|y| KalmanFilter::default().likelihood(model, y, concentrated))
        .collect()
}

/// Evaluate multiple candidate models on one series in parallel.
pub fn parallel_likelihoods(
    models: &[StateSpaceModel],
    y: &[f64],
    concentrated: bool,
) -> Vec<Result<Likelihood>> {
    models
        .par_iter()
        .map(|model| KalmanFilter::default().likelihood(model, y, concentrated))
        .collect()
}

/// Filter and smooth multiple series in parallel against one model.
pub fn parallel_smooth(
    model: &StateSpaceModel,
    series: &[Vec<f64>],
    variances: bool,
) -> Vec<Result<SmoothingResults>> {
    series
        .par_iter()
        .map(|y| {
            let filtered = KalmanFilter::default().filter(model, y)?;
            Smoother::default()
                .with_variances(variances)
                .smooth(model, y, &filtered)
        })
        .collect()
}
