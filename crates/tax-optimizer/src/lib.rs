//! Tax Optimizer
//!
//! Tax-loss harvesting candidates with a wash-sale proxy rule and
//! exposure-preserving substitutes.

pub mod harvester;
pub mod substitutes;
pub mod tax_calculator;
pub mod wash_sale;
#[cfg(test)]
mod tests;

pub use harvester::{
    HarvestCandidate, HarvestInputs, HarvestPriority, HarvestReport, HarvestWarning,
    HarvestingConfig, HarvestingEngine, SkipReason, SkippedLot,
};
pub use substitutes::{
    default_identical_groups, RejectedSubstitute, RejectionReason, Substitute, SubstituteFinder,
};
pub use tax_calculator::{GainType, HoldingPeriod, Lot, TaxCalculator, TaxEstimate, TaxRules};
pub use wash_sale::{TradeRecord, TradeSide, WashSaleHistory, WashSaleStatus};
