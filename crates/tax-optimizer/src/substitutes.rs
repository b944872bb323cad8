//! Substitute Security Finder
//!
//! Ranks replacement securities for a harvested position so the portfolio
//! keeps similar exposure, and rejects those the wash-sale proxy rule treats
//! as substantially identical or recently traded.

use crate::wash_sale::{WashSaleHistory, WashSaleStatus};
use chrono::NaiveDate;
use index_core::{canonical_sector, ExclusionSet, IndexingError, IndexingResult, Universe};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Tickers the proxy rule treats as the same security
pub fn default_identical_groups() -> Vec<Vec<String>> {
    [
        &["GOOGL", "GOOG"][..],
        &["BRK.A", "BRK.B", "BRK-A", "BRK-B"][..],
        &["FOXA", "FOX"][..],
        &["NWSA", "NWS"][..],
        &["SPY", "VOO", "IVV", "SPLG"][..],
        &["QQQ", "QQQM"][..],
    ]
    .iter()
    .map(|group| group.iter().map(|t| t.to_string()).collect())
    .collect()
}

/// A proposed replacement security
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitute {
    pub ticker: String,
    pub sector: String,
    /// Return correlation with the harvested security
    pub correlation: f64,
    /// Whether the substitute shares the harvested security's sector
    pub same_sector: bool,
}

/// Why a peer was not proposed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    SameSecurity,
    SubstantiallyIdentical,
    /// Sold from the same account inside the wash-sale window
    RecentlySold { sold_on: NaiveDate },
    /// Covered by the client's exclusions
    Excluded,
    /// The harvested security was itself bought inside the window
    OriginalRecentlyBought { bought_on: NaiveDate },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::SameSecurity => write!(f, "Same security"),
            RejectionReason::SubstantiallyIdentical => write!(f, "Substantially identical"),
            RejectionReason::RecentlySold { sold_on } => write!(f, "Sold on {}", sold_on),
            RejectionReason::Excluded => write!(f, "Excluded"),
            RejectionReason::OriginalRecentlyBought { bought_on } => {
                write!(f, "Original bought on {}", bought_on)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSubstitute {
    pub ticker: String,
    pub reason: RejectionReason,
}

/// Peer ranking over one universe and its correlation matrix
pub struct SubstituteFinder<'a> {
    universe: &'a Universe,
    correlation: Option<&'a DMatrix<f64>>,
    min_correlation: f64,
    identical_groups: &'a [Vec<String>],
}

impl<'a> SubstituteFinder<'a> {
    pub fn new(
        universe: &'a Universe,
        correlation: Option<&'a DMatrix<f64>>,
        min_correlation: f64,
        identical_groups: &'a [Vec<String>],
    ) -> IndexingResult<Self> {
        if let Some(c) = correlation {
            if c.nrows() != universe.len() || c.ncols() != universe.len() {
                return Err(IndexingError::InvalidInput(format!(
                    "correlation matrix is {}x{} for a universe of {}",
                    c.nrows(),
                    c.ncols(),
                    universe.len()
                )));
            }
        }
        Ok(Self {
            universe,
            correlation,
            min_correlation,
            identical_groups,
        })
    }

    /// Check if two tickers are substantially identical (would trigger wash sale)
    pub fn is_substantially_identical(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        self.identical_groups
            .iter()
            .any(|group| group.iter().any(|t| t == a) && group.iter().any(|t| t == b))
    }

    /// Peers of `ticker`, best first: same-sector peers by correlation
    /// descending, then other-sector peers whose correlation is at least
    /// `min_correlation`. Ties break on ticker. Without a correlation matrix
    /// only same-sector peers are returned, in ticker order.
    pub fn ranked_peers(&self, ticker: &str) -> Vec<Substitute> {
        let Some(origin) = self.universe.index_of(ticker) else {
            return Vec::new();
        };
        let sector = canonical_sector(&self.universe.instruments()[origin].sector);

        let mut same = Vec::new();
        let mut other = Vec::new();
        for (i, instrument) in self.universe.instruments().iter().enumerate() {
            if i == origin {
                continue;
            }
            let correlation = self.correlation.map(|c| c[(origin, i)]).unwrap_or(0.0);
            let same_sector = canonical_sector(&instrument.sector) == sector;
            let peer = Substitute {
                ticker: instrument.ticker.clone(),
                sector: instrument.sector.clone(),
                correlation,
                same_sector,
            };
            if same_sector {
                same.push(peer);
            } else if self.correlation.is_some() && correlation >= self.min_correlation {
                other.push(peer);
            }
        }

        let by_correlation = |a: &Substitute, b: &Substitute| {
            b.correlation
                .total_cmp(&a.correlation)
                .then_with(|| a.ticker.cmp(&b.ticker))
        };
        same.sort_by(by_correlation);
        other.sort_by(by_correlation);
        same.extend(other);
        same
    }

    /// Apply the proxy rule to one proposed substitute purchase.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &self,
        original: &str,
        candidate: &str,
        account_id: &str,
        history: &WashSaleHistory,
        exclusions: &ExclusionSet,
        purchase_date: NaiveDate,
        window_days: u32,
    ) -> Result<(), RejectionReason> {
        if original == candidate {
            return Err(RejectionReason::SameSecurity);
        }
        if self.is_substantially_identical(original, candidate) {
            return Err(RejectionReason::SubstantiallyIdentical);
        }
        if exclusions.tickers.contains(candidate)
            || self
                .universe
                .index_of(candidate)
                .and_then(|i| self.universe.get(i))
                .is_some_and(|instrument| exclusions.excludes(instrument))
        {
            return Err(RejectionReason::Excluded);
        }
        match history.check_purchase(account_id, candidate, purchase_date, window_days) {
            WashSaleStatus::RecentlySold { sold_on } => Err(RejectionReason::RecentlySold { sold_on }),
            _ => Ok(()),
        }
    }
}
