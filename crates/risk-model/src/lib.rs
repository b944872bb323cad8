//! Risk Model
//!
//! Well-conditioned covariance estimation for high-dimensional return panels
//! using Ledoit-Wolf shrinkage toward a constant-correlation target.

pub mod covariance;
pub mod returns;
pub mod shrinkage;

pub use covariance::{correlation_from_covariance, CovarianceMatrix};
pub use returns::{ColumnStats, ReturnMatrix};
pub use shrinkage::{LedoitWolf, ShrinkageEstimate, ShrinkageSettings};
