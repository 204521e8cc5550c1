use thiserror::Error;

#[derive(Error, Debug)]
pub enum SsfError {
    #[error("diffuse initialization error: {0}")]
    DiffuseInitialization(String),

    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Cholesky decomposition failed: matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("singular matrix: linear system has no unique solution")]
    SingularMatrix,

    #[error("filter divergence at t={t}: prediction-error variance F={f}")]
    FilterDivergence { t: usize, f: f64 },

    #[error("data error: {0}")]
    DataError(String),
}

pub type Result<T> = std::result::Result<T, SsfError>;
