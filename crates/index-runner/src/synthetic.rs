//! Synthetic demo request: a cap-weighted large-cap universe with
//! factor-model returns, a handful of tax lots and one recent sale.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use index_core::{ExclusionSet, Instrument, ReturnSeries, Universe};
use indexing_orchestrator::IndexingRequest;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use tax_optimizer::{Lot, TradeRecord, TradeSide};

const UNIVERSE: &[(&str, &str)] = &[
    // Mega caps first so small demos keep them
    ("AAPL", "Information Technology"),
    ("MSFT", "Information Technology"),
    ("NVDA", "Information Technology"),
    ("GOOGL", "Communication Services"),
    ("GOOG", "Communication Services"),
    ("AMZN", "Consumer Discretionary"),
    ("META", "Communication Services"),
    ("BRK-B", "Financials"),
    ("LLY", "Health Care"),
    ("TSLA", "Consumer Discretionary"),
    ("AVGO", "Information Technology"),
    ("JPM", "Financials"),
    ("V", "Financials"),
    ("XOM", "Energy"),
    ("WMT", "Consumer Staples"),
    // Technology
    ("ORCL", "Information Technology"),
    ("CRM", "Information Technology"),
    ("AMD", "Information Technology"),
    ("ADBE", "Information Technology"),
    ("CSCO", "Information Technology"),
    ("QCOM", "Information Technology"),
    ("TXN", "Information Technology"),
    ("IBM", "Information Technology"),
    // Health Care
    ("JNJ", "Health Care"),
    ("UNH", "Health Care"),
    ("PFE", "Health Care"),
    ("ABBV", "Health Care"),
    ("MRK", "Health Care"),
    ("TMO", "Health Care"),
    ("ABT", "Health Care"),
    // Financials
    ("BAC", "Financials"),
    ("GS", "Financials"),
    ("MA", "Financials"),
    ("WFC", "Financials"),
    ("MS", "Financials"),
    ("AXP", "Financials"),
    // Energy
    ("CVX", "Energy"),
    ("COP", "Energy"),
    ("SLB", "Energy"),
    ("EOG", "Energy"),
    ("MPC", "Energy"),
    ("PSX", "Energy"),
    ("OXY", "Energy"),
    // Consumer Discretionary
    ("HD", "Consumer Discretionary"),
    ("NKE", "Consumer Discretionary"),
    ("MCD", "Consumer Discretionary"),
    ("LOW", "Consumer Discretionary"),
    ("BKNG", "Consumer Discretionary"),
    // Industrials
    ("CAT", "Industrials"),
    ("HON", "Industrials"),
    ("UPS", "Industrials"),
    ("GE", "Industrials"),
    ("RTX", "Industrials"),
    ("DE", "Industrials"),
    ("UNP", "Industrials"),
    // Utilities
    ("NEE", "Utilities"),
    ("DUK", "Utilities"),
    ("SO", "Utilities"),
    // Materials
    ("LIN", "Materials"),
    ("SHW", "Materials"),
    ("FCX", "Materials"),
    // Real Estate
    ("AMT", "Real Estate"),
    ("PLD", "Real Estate"),
    ("EQIX", "Real Estate"),
    // Communication Services
    ("NFLX", "Communication Services"),
    ("DIS", "Communication Services"),
    ("CMCSA", "Communication Services"),
    ("VZ", "Communication Services"),
    // Consumer Staples
    ("PG", "Consumer Staples"),
    ("KO", "Consumer Staples"),
    ("PEP", "Consumer Staples"),
    ("COST", "Consumer Staples"),
];

/// Approximate market caps for the largest names
const MEGA_CAPS: &[(&str, f64)] = &[
    ("AAPL", 3.4e12),
    ("MSFT", 3.1e12),
    ("NVDA", 2.8e12),
    ("GOOGL", 2.1e12),
    ("GOOG", 2.1e12),
    ("AMZN", 1.9e12),
    ("META", 1.2e12),
    ("BRK-B", 900e9),
    ("LLY", 800e9),
    ("TSLA", 700e9),
    ("AVGO", 650e9),
    ("JPM", 600e9),
    ("V", 550e9),
    ("XOM", 500e9),
    ("WMT", 500e9),
];

pub fn max_assets() -> usize {
    UNIVERSE.len()
}

pub struct SyntheticOptions {
    pub assets: usize,
    pub periods: usize,
    pub seed: u64,
    pub exclude_sectors: Vec<String>,
    pub as_of: NaiveDate,
}

pub fn build_request(options: &SyntheticOptions) -> Result<IndexingRequest> {
    let assets = options.assets.clamp(2, UNIVERSE.len());
    let periods = options.periods.max(2);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let picked = &UNIVERSE[..assets];

    let universe = Universe::new(
        picked
            .iter()
            .map(|(ticker, sector)| Instrument::new(*ticker, *sector))
            .collect(),
    )?;
    let benchmark_weights = cap_weights(picked, &mut rng);

    // One market factor, one factor per sector, idiosyncratic noise.
    let market = Normal::new(0.0004, 0.010)?;
    let sector_noise = Normal::new(0.0, 0.006)?;
    let idio = Normal::new(0.0, 0.015)?;
    let market_path: Vec<f64> = (0..periods).map(|_| market.sample(&mut rng)).collect();
    let sector_paths: BTreeMap<String, Vec<f64>> = universe
        .sectors()
        .into_iter()
        .map(|s| (s, (0..periods).map(|_| sector_noise.sample(&mut rng)).collect()))
        .collect();

    let mut returns = Vec::with_capacity(assets);
    let mut prices = BTreeMap::new();
    for (ticker, sector) in picked {
        let beta: f64 = rng.gen_range(0.7..1.3);
        let sector_path = &sector_paths[*sector];
        let series: Vec<f64> = (0..periods)
            .map(|t| beta * market_path[t] + sector_path[t] + idio.sample(&mut rng))
            .collect();
        let start: f64 = rng.gen_range(40.0..400.0);
        let last = series.iter().fold(start, |p, r| p * (1.0 + r));
        prices.insert(ticker.to_string(), (last * 100.0).round() / 100.0);
        returns.push(ReturnSeries::new(*ticker, series));
    }

    let as_of = options.as_of;
    let mut lots = Vec::new();
    for (i, (ticker, _)) in picked.iter().enumerate().step_by(3).take(12) {
        let price = prices[*ticker];
        let basis: f64 = price * rng.gen_range(0.8..1.3);
        let shares = rng.gen_range(5..200) as f64;
        let held_days = rng.gen_range(35..600);
        lots.push(Lot::new(
            format!("lot-{:03}", i),
            "acct-1",
            *ticker,
            shares,
            (basis * 100.0).round() / 100.0,
            as_of - Duration::days(held_days),
        ));
    }

    // A recent sale in the account so the wash-sale check has something to reject.
    let trade_history = picked
        .get(1)
        .map(|(ticker, _)| TradeRecord {
            account_id: "acct-1".to_string(),
            ticker: ticker.to_string(),
            side: TradeSide::Sell,
            date: as_of - Duration::days(10),
        })
        .into_iter()
        .collect();

    let exclusions = options
        .exclude_sectors
        .iter()
        .fold(ExclusionSet::new(), |set, s| set.with_sector(s.clone()));

    Ok(IndexingRequest {
        client_id: format!("synthetic-{}", options.seed),
        as_of,
        universe,
        benchmark_weights,
        exclusions,
        constraints: None,
        returns,
        lots,
        prices,
        trade_history,
        realized: None,
    })
}

/// Market-cap benchmark: known mega caps, a long tail drawn at random.
fn cap_weights(picked: &[(&str, &str)], rng: &mut StdRng) -> BTreeMap<String, f64> {
    let caps: Vec<f64> = picked
        .iter()
        .map(|(ticker, _)| {
            MEGA_CAPS
                .iter()
                .find(|(t, _)| t == ticker)
                .map(|(_, cap)| *cap)
                .unwrap_or_else(|| {
                    if rng.gen_bool(0.8) {
                        rng.gen_range(10e9..100e9)
                    } else {
                        rng.gen_range(100e9..400e9)
                    }
                })
        })
        .collect();
    let total: f64 = caps.iter().sum();
    picked
        .iter()
        .zip(caps)
        .map(|((ticker, _), cap)| (ticker.to_string(), cap / total))
        .collect()
}
