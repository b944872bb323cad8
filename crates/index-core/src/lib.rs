//! Shared data model for the direct-indexing engine.
//!
//! Every vector and matrix handled by the risk model, optimizer, attribution
//! and harvesting crates is indexed by a single [`Universe`].

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

/// Tolerance on `sum(w) = 1` for weight vectors leaving the optimizer.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Smallest weight accepted as "non-negative" after a solve.
pub const NEGATIVE_WEIGHT_TOLERANCE: f64 = 1e-8;

/// Tolerance on the attribution closure check.
pub const ATTRIBUTION_CLOSURE_TOLERANCE: f64 = 1e-6;

/// Trading periods per year used when annualizing daily statistics.
pub const PERIODS_PER_YEAR: f64 = 252.0;
