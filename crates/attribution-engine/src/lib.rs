//! Attribution Engine
//!
//! Brinson-Fachler decomposition of active return into sector allocation and
//! selection effects, plus instrument-level active contributions.

pub mod brinson;
pub mod contributors;
#[cfg(test)]
mod tests;

pub use brinson::{AttributionEngine, AttributionResult, AttributionSettings, SectorEffect, SectorInput};
pub use contributors::{ContributionStatus, InstrumentContribution};
