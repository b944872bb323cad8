//! Wash Sale Proxy Rule
//!
//! Trade history per (account, ticker) and the checks that decide whether a
//! proposed substitute purchase, or the harvest itself, carries wash-sale risk.
//! The history is read-only here; accepting a harvest produces a new history.

use crate::harvester::HarvestCandidate;
use crate::tax_calculator::Lot;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One executed trade in a client account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub account_id: String,
    pub ticker: String,
    pub side: TradeSide,
    pub date: NaiveDate,
}

/// Status of a wash sale check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WashSaleStatus {
    /// Safe to trade - no wash sale risk
    Safe,
    /// The security was sold from this account inside the window
    RecentlySold { sold_on: NaiveDate },
    /// The security was bought in this account inside the window
    RecentlyBought { bought_on: NaiveDate },
}

impl WashSaleStatus {
    pub fn is_safe(&self) -> bool {
        matches!(self, WashSaleStatus::Safe)
    }
}

impl std::fmt::Display for WashSaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WashSaleStatus::Safe => write!(f, "Safe"),
            WashSaleStatus::RecentlySold { sold_on } => write!(f, "Sold on {}", sold_on),
            WashSaleStatus::RecentlyBought { bought_on } => write!(f, "Bought on {}", bought_on),
        }
    }
}

/// Trade history owned by the portfolio store, handed in per request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WashSaleHistory {
    trades: Vec<TradeRecord>,
}

impl WashSaleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trades(trades: Vec<TradeRecord>) -> Self {
        Self { trades }
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    fn latest(&self, account_id: &str, ticker: &str, side: TradeSide, on_or_before: NaiveDate) -> Option<NaiveDate> {
        self.trades
            .iter()
            .filter(|t| {
                t.account_id == account_id
                    && t.ticker == ticker
                    && t.side == side
                    && t.date <= on_or_before
            })
            .map(|t| t.date)
            .max()
    }

    /// Most recent sale of `ticker` from `account_id` on or before `as_of`.
    pub fn last_sale(&self, account_id: &str, ticker: &str, as_of: NaiveDate) -> Option<NaiveDate> {
        self.latest(account_id, ticker, TradeSide::Sell, as_of)
    }

    /// Most recent purchase of `ticker` into `account_id` on or before `as_of`.
    pub fn last_purchase(&self, account_id: &str, ticker: &str, as_of: NaiveDate) -> Option<NaiveDate> {
        self.latest(account_id, ticker, TradeSide::Buy, as_of)
    }

    /// Whether buying `ticker` on `purchase_date` would follow a sale from the
    /// same account inside the preceding `window_days`.
    pub fn check_purchase(
        &self,
        account_id: &str,
        ticker: &str,
        purchase_date: NaiveDate,
        window_days: u32,
    ) -> WashSaleStatus {
        match self.last_sale(account_id, ticker, purchase_date) {
            Some(sold_on) if within(sold_on, purchase_date, window_days) => {
                WashSaleStatus::RecentlySold { sold_on }
            }
            _ => WashSaleStatus::Safe,
        }
    }

    /// Whether selling `lot` on `sale_date` is already tainted by a purchase of
    /// the same ticker in the same account inside the preceding window. Lot
    /// acquisition dates count as purchases alongside the recorded trades.
    pub fn check_sale(
        &self,
        lot: &Lot,
        account_lots: &[Lot],
        sale_date: NaiveDate,
        window_days: u32,
    ) -> WashSaleStatus {
        let from_lots = account_lots
            .iter()
            .filter(|l| l.account_id == lot.account_id && l.ticker == lot.ticker)
            .map(|l| l.acquired)
            .filter(|d| *d <= sale_date);
        let latest = from_lots
            .chain(self.last_purchase(&lot.account_id, &lot.ticker, sale_date))
            .max();

        match latest {
            Some(bought_on) if within(bought_on, sale_date, window_days) => {
                WashSaleStatus::RecentlyBought { bought_on }
            }
            _ => WashSaleStatus::Safe,
        }
    }

    /// History after executing `candidate` on `date`: the lot's ticker is sold
    /// and its substitute, if any, bought. `self` is left untouched.
    pub fn with_accepted(&self, candidate: &HarvestCandidate, date: NaiveDate) -> Self {
        let mut trades = self.trades.clone();
        trades.push(TradeRecord {
            account_id: candidate.account_id.clone(),
            ticker: candidate.ticker.clone(),
            side: TradeSide::Sell,
            date,
        });
        if let Some(substitute) = &candidate.substitute {
            trades.push(TradeRecord {
                account_id: candidate.account_id.clone(),
                ticker: substitute.ticker.clone(),
                side: TradeSide::Buy,
                date,
            });
        }
        Self { trades }
    }
}

/// `earlier` lies in `[later - window_days, later]`.
fn within(earlier: NaiveDate, later: NaiveDate, window_days: u32) -> bool {
    earlier <= later && (later - earlier).num_days() <= window_days as i64
}
