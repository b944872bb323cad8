//! Tax Calculator
//!
//! Tax lots, holding-period classification and estimated savings from
//! realizing a loss.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Tax policy applied to harvesting decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRules {
    /// Wash sale window in calendar days (before and after a sale)
    pub wash_sale_window_days: u32,
    /// Days to qualify for long-term treatment
    pub long_term_threshold_days: u32,
    /// Short-term capital gains tax rate
    pub short_term_rate: f64,
    /// Long-term capital gains tax rate
    pub long_term_rate: f64,
    /// Whether the harvested security itself may not be bought back
    /// until the window has passed
    pub block_original_repurchase: bool,
}

impl Default for TaxRules {
    fn default() -> Self {
        Self::us()
    }
}

impl TaxRules {
    /// US federal rules at top marginal rates
    pub fn us() -> Self {
        Self {
            wash_sale_window_days: 30,
            long_term_threshold_days: 365,
            short_term_rate: 0.37,
            long_term_rate: 0.20,
            block_original_repurchase: true,
        }
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(self.wash_sale_window_days as i64)
    }

    /// First day the harvested security can be bought back.
    pub fn repurchase_date(&self, sale_date: NaiveDate) -> NaiveDate {
        sale_date + self.window() + chrono::Duration::days(1)
    }
}

/// Holding period classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldingPeriod {
    ShortTerm,
    LongTerm,
}

/// Type of gain/loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GainType {
    ShortTermGain,
    ShortTermLoss,
    LongTermGain,
    LongTermLoss,
}

impl GainType {
    pub fn is_loss(&self) -> bool {
        matches!(self, GainType::ShortTermLoss | GainType::LongTermLoss)
    }

    pub fn is_long_term(&self) -> bool {
        matches!(self, GainType::LongTermGain | GainType::LongTermLoss)
    }
}

/// One tax lot held in a client account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    /// Unique ID
    pub id: String,
    /// Account holding the lot
    pub account_id: String,
    pub ticker: String,
    /// Number of shares
    pub shares: f64,
    /// Cost basis per share
    pub cost_basis_per_share: f64,
    /// Purchase date
    pub acquired: NaiveDate,
}

impl Lot {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        ticker: impl Into<String>,
        shares: f64,
        cost_basis_per_share: f64,
        acquired: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            ticker: ticker.into(),
            shares,
            cost_basis_per_share,
            acquired,
        }
    }

    pub fn total_cost_basis(&self) -> f64 {
        self.shares * self.cost_basis_per_share
    }

    /// `(price - cost basis) × shares`; negative for a loss
    pub fn unrealized_gain_loss(&self, current_price: f64) -> f64 {
        (current_price - self.cost_basis_per_share) * self.shares
    }

    pub fn days_held(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.acquired).num_days()
    }

    pub fn holding_period(&self, as_of: NaiveDate, rules: &TaxRules) -> HoldingPeriod {
        if self.days_held(as_of) >= rules.long_term_threshold_days as i64 {
            HoldingPeriod::LongTerm
        } else {
            HoldingPeriod::ShortTerm
        }
    }
}

/// Tax estimate for selling a lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxEstimate {
    /// Gain or loss amount
    pub gain_loss: f64,
    /// Type of gain/loss
    pub gain_type: GainType,
    /// Applicable tax rate
    pub tax_rate: f64,
    /// Estimated tax impact (negative = savings)
    pub tax_impact: f64,
    pub holding_period: HoldingPeriod,
    pub days_held: i64,
    /// Days until long-term (if still short-term)
    pub days_until_long_term: Option<i64>,
}

impl TaxEstimate {
    pub fn estimated_savings(&self) -> f64 {
        (-self.tax_impact).max(0.0)
    }
}

/// Tax calculator for one set of rules
#[derive(Debug, Clone, Default)]
pub struct TaxCalculator {
    rules: TaxRules,
}

impl TaxCalculator {
    pub fn with_rules(rules: TaxRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &TaxRules {
        &self.rules
    }

    /// Estimate tax impact of selling `lot` at `current_price` on `as_of`.
    pub fn estimate_sale(&self, lot: &Lot, current_price: f64, as_of: NaiveDate) -> TaxEstimate {
        let gain_loss = lot.unrealized_gain_loss(current_price);
        let holding_period = lot.holding_period(as_of, &self.rules);
        let days_held = lot.days_held(as_of);

        let gain_type = match (gain_loss >= 0.0, holding_period) {
            (true, HoldingPeriod::LongTerm) => GainType::LongTermGain,
            (true, HoldingPeriod::ShortTerm) => GainType::ShortTermGain,
            (false, HoldingPeriod::LongTerm) => GainType::LongTermLoss,
            (false, HoldingPeriod::ShortTerm) => GainType::ShortTermLoss,
        };
        let tax_rate = if gain_type.is_long_term() {
            self.rules.long_term_rate
        } else {
            self.rules.short_term_rate
        };
        let threshold = self.rules.long_term_threshold_days as i64;

        TaxEstimate {
            gain_loss,
            gain_type,
            tax_rate,
            tax_impact: gain_loss * tax_rate,
            holding_period,
            days_held,
            days_until_long_term: (days_held < threshold).then(|| threshold - days_held),
        }
    }
}
