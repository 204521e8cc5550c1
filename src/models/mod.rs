//! Built-in model families.

pub mod arma;
pub mod composite;
pub mod regression;
pub mod structural;

pub use arma::{stationary_covariance, Arma, ArmaDynamics};
pub use composite::CompositeModel;
pub use regression::Regression;
pub use structural::{Ar1, LocalLevel, LocalLinearTrend, SeasonalDummy, UnitLoading};
