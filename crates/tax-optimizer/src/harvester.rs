//! Tax-Loss Harvesting Engine
//!
//! Scans lots for losses beyond a threshold and pairs each with a substitute
//! that keeps the exposure without tripping the wash-sale proxy rule.
//! Evaluation is pure: the same lots, prices, history and `as_of` date always
//! produce the same report.

use crate::substitutes::{
    default_identical_groups, RejectedSubstitute, RejectionReason, Substitute, SubstituteFinder,
};
use crate::tax_calculator::{Lot, TaxCalculator, TaxEstimate, TaxRules};
use crate::wash_sale::{WashSaleHistory, WashSaleStatus};
use chrono::NaiveDate;
use index_core::{ExclusionSet, IndexingResult, Universe};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Priority level for harvesting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HarvestPriority {
    /// Small potential savings
    Low,
    Medium,
    /// Significant savings
    High,
}

impl HarvestPriority {
    /// Determine priority based on tax savings
    pub fn from_savings(savings: f64) -> Self {
        if savings >= 1000.0 {
            Self::High
        } else if savings >= 250.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Soft per-candidate problems; the candidate is still reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HarvestWarning {
    /// No sector or correlation peer passed the wash-sale check
    NoSubstituteAvailable,
    /// The harvested ticker was bought in this account inside the window
    PreExistingWashSale { bought_on: NaiveDate },
    /// The ticker is not in the universe, so it has no sector or peers
    NotInUniverse,
}

impl std::fmt::Display for HarvestWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarvestWarning::NoSubstituteAvailable => write!(f, "No substitute available"),
            HarvestWarning::PreExistingWashSale { bought_on } => {
                write!(f, "Pre-existing wash sale (bought {})", bought_on)
            }
            HarvestWarning::NotInUniverse => write!(f, "Not in universe"),
        }
    }
}

/// A lot worth harvesting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestCandidate {
    pub lot_id: String,
    pub account_id: String,
    pub ticker: String,
    pub sector: Option<String>,
    pub shares: f64,
    pub cost_basis_per_share: f64,
    pub current_price: f64,
    /// Unrealized loss (positive number)
    pub unrealized_loss: f64,
    /// Proposed replacement, if one passed the wash-sale check
    pub substitute: Option<Substitute>,
    /// Peers considered and turned down, in ranking order
    pub rejected_substitutes: Vec<RejectedSubstitute>,
    pub wash_sale_risk: bool,
    pub warnings: Vec<HarvestWarning>,
    pub tax: TaxEstimate,
    pub priority: HarvestPriority,
    /// First day the harvested ticker can be bought back
    pub repurchase_blocked_until: Option<NaiveDate>,
    pub reason: String,
}

impl HarvestCandidate {
    pub fn has_warning(&self, warning: &HarvestWarning) -> bool {
        self.warnings.contains(warning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    MissingPrice,
    InvalidPrice,
    NonPositiveShares,
    /// Acquired after the evaluation date
    FutureLot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedLot {
    pub lot_id: String,
    pub ticker: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestReport {
    /// Ordered by unrealized loss, largest first
    pub candidates: Vec<HarvestCandidate>,
    pub skipped: Vec<SkippedLot>,
    pub lots_evaluated: usize,
    pub total_harvestable_loss: f64,
    pub total_estimated_tax_savings: f64,
}

/// Harvesting engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestingConfig {
    /// Minimum loss in dollars; a lot qualifies when its loss exceeds this
    pub loss_threshold: f64,
    /// Optional minimum loss as a fraction of cost basis (0.10 = 10%)
    #[serde(default)]
    pub min_loss_fraction: Option<f64>,
    /// Cross-sector peers need at least this correlation
    pub min_correlation: f64,
    /// Groups of tickers treated as the same security
    pub identical_groups: Vec<Vec<String>>,
}

impl Default for HarvestingConfig {
    fn default() -> Self {
        Self {
            loss_threshold: 0.0,
            min_loss_fraction: None,
            min_correlation: 0.5,
            identical_groups: default_identical_groups(),
        }
    }
}

/// Everything one harvesting pass reads
#[derive(Debug, Clone, Copy)]
pub struct HarvestInputs<'a> {
    pub lots: &'a [Lot],
    pub prices: &'a BTreeMap<String, f64>,
    pub history: &'a WashSaleHistory,
    pub universe: &'a Universe,
    /// Correlation over `universe`, used to rank peers
    pub correlation: Option<&'a DMatrix<f64>>,
    pub exclusions: &'a ExclusionSet,
    /// Proposed sale and substitute purchase date
    pub as_of: NaiveDate,
}

/// Engine for finding tax-loss harvesting candidates
#[derive(Debug, Clone, Default)]
pub struct HarvestingEngine {
    calculator: TaxCalculator,
    config: HarvestingConfig,
}

impl HarvestingEngine {
    pub fn new(rules: TaxRules, config: HarvestingConfig) -> Self {
        Self {
            calculator: TaxCalculator::with_rules(rules),
            config,
        }
    }

    pub fn config(&self) -> &HarvestingConfig {
        &self.config
    }

    pub fn rules(&self) -> &TaxRules {
        self.calculator.rules()
    }

    /// Find all harvesting candidates, largest loss first.
    pub fn find_candidates(&self, inputs: &HarvestInputs<'_>) -> IndexingResult<HarvestReport> {
        let finder = SubstituteFinder::new(
            inputs.universe,
            inputs.correlation,
            self.config.min_correlation,
            &self.config.identical_groups,
        )?;
        let rules = self.calculator.rules();

        let mut report = HarvestReport {
            lots_evaluated: inputs.lots.len(),
            ..Default::default()
        };

        for lot in inputs.lots {
            let current_price = match self.price_for(lot, inputs) {
                Ok(price) => price,
                Err(reason) => {
                    tracing::debug!("Skipping lot {} ({}): {:?}", lot.id, lot.ticker, reason);
                    report.skipped.push(SkippedLot {
                        lot_id: lot.id.clone(),
                        ticker: lot.ticker.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let gain_loss = lot.unrealized_gain_loss(current_price);
            if gain_loss >= 0.0 {
                continue;
            }
            let unrealized_loss = -gain_loss;
            if unrealized_loss <= self.config.loss_threshold {
                continue;
            }
            if let Some(fraction) = self.config.min_loss_fraction {
                let basis = lot.total_cost_basis();
                if basis > 0.0 && unrealized_loss / basis < fraction {
                    continue;
                }
            }

            report
                .candidates
                .push(self.build_candidate(lot, current_price, unrealized_loss, &finder, inputs));
        }

        report.candidates.sort_by(|a, b| {
            b.unrealized_loss
                .total_cmp(&a.unrealized_loss)
                .then_with(|| a.lot_id.cmp(&b.lot_id))
                .then_with(|| a.account_id.cmp(&b.account_id))
        });
        report.total_harvestable_loss = report.candidates.iter().map(|c| c.unrealized_loss).sum();
        report.total_estimated_tax_savings = report
            .candidates
            .iter()
            .map(|c| c.tax.estimated_savings())
            .sum();

        tracing::info!(
            "Harvest scan: {} lots, {} candidates, {} skipped, harvestable loss ${:.2} (window {} days)",
            report.lots_evaluated,
            report.candidates.len(),
            report.skipped.len(),
            report.total_harvestable_loss,
            rules.wash_sale_window_days
        );
        Ok(report)
    }

    fn price_for(&self, lot: &Lot, inputs: &HarvestInputs<'_>) -> Result<f64, SkipReason> {
        if !(lot.shares > 0.0) {
            return Err(SkipReason::NonPositiveShares);
        }
        if lot.acquired > inputs.as_of {
            return Err(SkipReason::FutureLot);
        }
        let price = *inputs.prices.get(&lot.ticker).ok_or(SkipReason::MissingPrice)?;
        if !(price.is_finite() && price > 0.0) || !lot.cost_basis_per_share.is_finite() {
            return Err(SkipReason::InvalidPrice);
        }
        Ok(price)
    }

    fn build_candidate(
        &self,
        lot: &Lot,
        current_price: f64,
        unrealized_loss: f64,
        finder: &SubstituteFinder<'_>,
        inputs: &HarvestInputs<'_>,
    ) -> HarvestCandidate {
        let rules = self.calculator.rules();
        let window = rules.wash_sale_window_days;
        let tax = self.calculator.estimate_sale(lot, current_price, inputs.as_of);
        let sector = inputs
            .universe
            .sector_of(&lot.ticker)
            .map(str::to_string);

        let mut warnings = Vec::new();
        let mut rejected = Vec::new();
        let mut substitute = None;

        let peers = finder.ranked_peers(&lot.ticker);
        if sector.is_none() {
            warnings.push(HarvestWarning::NotInUniverse);
        }

        let taint = inputs.history.check_sale(lot, inputs.lots, inputs.as_of, window);
        if let WashSaleStatus::RecentlyBought { bought_on } = taint {
            warnings.push(HarvestWarning::PreExistingWashSale { bought_on });
            rejected.extend(peers.iter().map(|p| RejectedSubstitute {
                ticker: p.ticker.clone(),
                reason: RejectionReason::OriginalRecentlyBought { bought_on },
            }));
        } else {
            for peer in peers {
                match finder.check(
                    &lot.ticker,
                    &peer.ticker,
                    &lot.account_id,
                    inputs.history,
                    inputs.exclusions,
                    inputs.as_of,
                    window,
                ) {
                    Ok(()) => {
                        substitute = Some(peer);
                        break;
                    }
                    Err(reason) => {
                        tracing::debug!(
                            "Substitute {} for {} rejected: {}",
                            peer.ticker,
                            lot.ticker,
                            reason
                        );
                        rejected.push(RejectedSubstitute {
                            ticker: peer.ticker,
                            reason,
                        });
                    }
                }
            }
        }

        if substitute.is_none() {
            warnings.push(HarvestWarning::NoSubstituteAvailable);
        }
        let wash_sale_risk = !taint.is_safe() || substitute.is_none();
        let priority = HarvestPriority::from_savings(tax.estimated_savings());
        let reason = describe(lot, unrealized_loss, &tax, substitute.as_ref());

        HarvestCandidate {
            lot_id: lot.id.clone(),
            account_id: lot.account_id.clone(),
            ticker: lot.ticker.clone(),
            sector,
            shares: lot.shares,
            cost_basis_per_share: lot.cost_basis_per_share,
            current_price,
            unrealized_loss,
            substitute,
            rejected_substitutes: rejected,
            wash_sale_risk,
            warnings,
            tax,
            priority,
            repurchase_blocked_until: rules
                .block_original_repurchase
                .then(|| rules.repurchase_date(inputs.as_of)),
            reason,
        }
    }
}

/// Human-readable summary of one candidate
fn describe(lot: &Lot, loss: f64, tax: &TaxEstimate, substitute: Option<&Substitute>) -> String {
    let mut reasons = vec![format!(
        "Potential ${:.0} tax savings from ${:.0} loss",
        tax.estimated_savings(),
        loss
    )];

    if let Some(days) = tax.days_until_long_term {
        if days <= 30 {
            reasons.push(format!("Long-term treatment in {} days", days));
        }
    }

    let basis = lot.total_cost_basis();
    if basis > 0.0 {
        let loss_pct = loss / basis * 100.0;
        if loss_pct > 20.0 {
            reasons.push(format!("Significant {:.1}% loss from cost basis", loss_pct));
        }
    }

    match substitute {
        Some(s) => reasons.push(format!(
            "Replace with {} (correlation {:.2})",
            s.ticker, s.correlation
        )),
        None => reasons.push("No wash-sale-safe substitute".to_string()),
    }

    reasons.join(". ")
}
