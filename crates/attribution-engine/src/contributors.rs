//! Instrument-level active contributions.

use index_core::{ExclusionSet, Universe};
use serde::{Deserialize, Serialize};

/// Weights below this are reported as not held.
pub const HELD_WEIGHT_THRESHOLD: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContributionStatus {
    Held,
    /// Removed by a client exclusion
    Excluded,
    /// Eligible but left out (or below the display threshold) by the optimizer
    NotHeld,
}

impl std::fmt::Display for ContributionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContributionStatus::Held => write!(f, "Held"),
            ContributionStatus::Excluded => write!(f, "Excluded"),
            ContributionStatus::NotHeld => write!(f, "Not Held"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentContribution {
    pub ticker: String,
    pub sector: String,
    pub portfolio_weight: f64,
    pub benchmark_weight: f64,
    pub active_weight: f64,
    pub period_return: f64,
    /// `active_weight × period_return`
    pub active_contribution: f64,
    pub status: ContributionStatus,
}

pub fn instrument_contributions(
    universe: &Universe,
    portfolio_weights: &[f64],
    benchmark_weights: &[f64],
    returns: &[f64],
    exclusions: &ExclusionSet,
) -> Vec<InstrumentContribution> {
    universe
        .instruments()
        .iter()
        .zip(portfolio_weights)
        .zip(benchmark_weights)
        .zip(returns)
        .map(|(((instrument, wp), wb), r)| {
            let status = if exclusions.excludes(instrument) {
                ContributionStatus::Excluded
            } else if *wp > HELD_WEIGHT_THRESHOLD {
                ContributionStatus::Held
            } else {
                ContributionStatus::NotHeld
            };
            let active_weight = wp - wb;
            InstrumentContribution {
                ticker: instrument.ticker.clone(),
                sector: instrument.sector.clone(),
                portfolio_weight: *wp,
                benchmark_weight: *wb,
                active_weight,
                period_return: *r,
                active_contribution: active_weight * r,
                status,
            }
        })
        .collect()
}

/// Largest positive contributions, at most `k`.
pub fn top_contributors(contributions: &[InstrumentContribution], k: usize) -> Vec<InstrumentContribution> {
    let mut positive: Vec<InstrumentContribution> = contributions
        .iter()
        .filter(|c| c.active_contribution > 0.0)
        .cloned()
        .collect();
    positive.sort_by(|a, b| {
        b.active_contribution
            .total_cmp(&a.active_contribution)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    positive.truncate(k);
    positive
}

/// Most negative contributions, at most `k`.
pub fn top_detractors(contributions: &[InstrumentContribution], k: usize) -> Vec<InstrumentContribution> {
    let mut negative: Vec<InstrumentContribution> = contributions
        .iter()
        .filter(|c| c.active_contribution < 0.0)
        .cloned()
        .collect();
    negative.sort_by(|a, b| {
        a.active_contribution
            .total_cmp(&b.active_contribution)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    negative.truncate(k);
    negative
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use index_core::Instrument;

    #[test]
    fn test_excluded_name_that_rallied_is_a_detractor() {
        let universe = Universe::new(vec![
            Instrument::new("AAPL", "Information Technology"),
            Instrument::new("MSFT", "Information Technology"),
            Instrument::new("GOOG", "Communication Services"),
        ])
        .unwrap();
        let contributions = instrument_contributions(
            &universe,
            &[0.05, 0.0, 0.02],
            &[0.04, 0.06, 0.02],
            &[0.10, 0.10, -0.05],
            &ExclusionSet::new().with_ticker("MSFT"),
        );

        let detractors = top_detractors(&contributions, 5);
        assert_eq!(detractors.len(), 1);
        assert_eq!(detractors[0].ticker, "MSFT");
        assert_eq!(detractors[0].status, ContributionStatus::Excluded);
        assert_relative_eq!(detractors[0].active_contribution, -0.006, epsilon = 1e-12);

        let contributors = top_contributors(&contributions, 5);
        assert_eq!(contributors.len(), 1);
        assert_eq!(contributors[0].ticker, "AAPL");
        assert_eq!(contributors[0].status, ContributionStatus::Held);
    }

    #[test]
    fn test_top_k_truncates_with_ticker_tie_break() {
        let universe = Universe::new(
            ["D", "C", "B", "A"]
                .iter()
                .map(|t| Instrument::new(*t, "Energy"))
                .collect(),
        )
        .unwrap();
        let contributions = instrument_contributions(
            &universe,
            &[0.3, 0.3, 0.3, 0.1],
            &[0.2, 0.2, 0.2, 0.4],
            &[0.01, 0.01, 0.01, 0.02],
            &ExclusionSet::new(),
        );
        let top = top_contributors(&contributions, 2);
        let tickers: Vec<&str> = top.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["B", "C"]);
    }

    #[test]
    fn test_unheld_eligible_name_is_not_held() {
        let universe = Universe::new(vec![Instrument::new("XOM", "Energy")]).unwrap();
        let contributions =
            instrument_contributions(&universe, &[0.00001], &[1.0], &[0.0], &ExclusionSet::new());
        assert_eq!(contributions[0].status, ContributionStatus::NotHeld);
    }
}
