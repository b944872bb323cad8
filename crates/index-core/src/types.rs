use crate::error::{IndexingError, IndexingResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One tradable instrument with its sector tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub ticker: String,
    pub sector: String,
}

impl Instrument {
    pub fn new(ticker: impl Into<String>, sector: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            sector: sector.into(),
        }
    }
}

/// Ordered set of instruments defining the index space of one request.
///
/// Position `i` of every weight vector, return column and covariance row refers
/// to `instruments[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Instrument>", into = "Vec<Instrument>")]
pub struct Universe {
    instruments: Vec<Instrument>,
    positions: BTreeMap<String, usize>,
}

impl Universe {
    pub fn new(instruments: Vec<Instrument>) -> IndexingResult<Self> {
        if instruments.is_empty() {
            return Err(IndexingError::InvalidInput("universe is empty".to_string()));
        }

        let mut positions = BTreeMap::new();
        for (i, instrument) in instruments.iter().enumerate() {
            if instrument.ticker.trim().is_empty() {
                return Err(IndexingError::InvalidInput(format!(
                    "instrument at position {} has an empty ticker",
                    i
                )));
            }
            if positions.insert(instrument.ticker.clone(), i).is_some() {
                return Err(IndexingError::InvalidInput(format!(
                    "duplicate ticker {} in universe",
                    instrument.ticker
                )));
            }
        }

        Ok(Self {
            instruments,
            positions,
        })
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn get(&self, index: usize) -> Option<&Instrument> {
        self.instruments.get(index)
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.instruments.iter().map(|i| i.ticker.as_str())
    }

    pub fn index_of(&self, ticker: &str) -> Option<usize> {
        self.positions.get(ticker).copied()
    }

    pub fn sector_of(&self, ticker: &str) -> Option<&str> {
        self.index_of(ticker)
            .map(|i| self.instruments[i].sector.as_str())
    }

    /// Canonical sector -> the first label used for it, in universe order.
    fn sector_labels(&self) -> BTreeMap<String, &str> {
        let mut labels = BTreeMap::new();
        for instrument in &self.instruments {
            labels
                .entry(canonical_sector(&instrument.sector))
                .or_insert(instrument.sector.as_str());
        }
        labels
    }

    /// One label per distinct sector (aliases merged), sorted.
    pub fn sectors(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.sector_labels().into_values().collect();
        set.into_iter().map(str::to_string).collect()
    }

    /// Label the universe uses for `sector` or any of its aliases.
    pub fn sector_label(&self, sector: &str) -> Option<String> {
        self.sector_labels()
            .get(&canonical_sector(sector))
            .map(|label| label.to_string())
    }

    pub fn indices_in_sector(&self, sector: &str) -> Vec<usize> {
        let target = canonical_sector(sector);
        self.instruments
            .iter()
            .enumerate()
            .filter(|(_, i)| canonical_sector(&i.sector) == target)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Sum a universe-indexed vector per sector, keyed by [`Universe::sectors`] labels.
    pub fn aggregate_by_sector(&self, values: &[f64]) -> BTreeMap<String, f64> {
        let labels = self.sector_labels();
        let mut out = BTreeMap::new();
        for (instrument, value) in self.instruments.iter().zip(values) {
            let canonical = canonical_sector(&instrument.sector);
            let label = labels
                .get(&canonical)
                .copied()
                .unwrap_or(instrument.sector.as_str());
            *out.entry(label.to_string()).or_insert(0.0) += value;
        }
        out
    }
}

impl TryFrom<Vec<Instrument>> for Universe {
    type Error = IndexingError;

    fn try_from(instruments: Vec<Instrument>) -> Result<Self, Self::Error> {
        Universe::new(instruments)
    }
}

impl From<Universe> for Vec<Instrument> {
    fn from(universe: Universe) -> Self {
        universe.instruments
    }
}

/// Sector labels that name the same GICS sector under different data vendors.
const SECTOR_ALIASES: &[(&str, &str)] = &[
    ("technology", "information technology"),
    ("tech", "information technology"),
    ("healthcare", "health care"),
    ("financial", "financials"),
    ("communication", "communication services"),
    ("industrial", "industrials"),
];

/// Normalize a sector label for comparison: lowercase, trimmed, alias-resolved.
pub fn canonical_sector(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    SECTOR_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

/// Client exclusions: sectors and/or individual tickers forced to zero weight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    #[serde(default)]
    pub sectors: BTreeSet<String>,
    #[serde(default)]
    pub tickers: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sectors.insert(sector.into());
        self
    }

    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.tickers.insert(ticker.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty() && self.tickers.is_empty()
    }

    pub fn excludes(&self, instrument: &Instrument) -> bool {
        if self.tickers.contains(&instrument.ticker) {
            return true;
        }
        let sector = canonical_sector(&instrument.sector);
        self.sectors.iter().any(|s| canonical_sector(s) == sector)
    }

    /// Universe positions removed by this exclusion set, ascending.
    pub fn excluded_indices(&self, universe: &Universe) -> Vec<usize> {
        universe
            .instruments()
            .iter()
            .enumerate()
            .filter(|(_, instrument)| self.excludes(instrument))
            .map(|(i, _)| i)
            .collect()
    }

    /// Labels in the set that match nothing in the universe.
    pub fn unmatched(&self, universe: &Universe) -> Vec<String> {
        let mut unmatched = Vec::new();
        for sector in &self.sectors {
            let canonical = canonical_sector(sector);
            if !universe
                .instruments()
                .iter()
                .any(|i| canonical_sector(&i.sector) == canonical)
            {
                unmatched.push(sector.clone());
            }
        }
        for ticker in &self.tickers {
            if universe.index_of(ticker).is_none() {
                unmatched.push(ticker.clone());
            }
        }
        unmatched
    }

    /// Human-readable label list, e.g. for commentary prompts.
    pub fn describe(&self) -> String {
        let labels: Vec<&str> = self
            .sectors
            .iter()
            .chain(self.tickers.iter())
            .map(String::as_str)
            .collect();
        if labels.is_empty() {
            "None".to_string()
        } else {
            labels.join(", ")
        }
    }
}

/// Benchmark weights over a universe: non-negative, summing to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BenchmarkWeights(Vec<f64>);

impl TryFrom<Vec<f64>> for BenchmarkWeights {
    type Error = IndexingError;

    fn try_from(weights: Vec<f64>) -> Result<Self, Self::Error> {
        BenchmarkWeights::new(weights)
    }
}

impl From<BenchmarkWeights> for Vec<f64> {
    fn from(weights: BenchmarkWeights) -> Self {
        weights.0
    }
}

impl BenchmarkWeights {
    pub const SUM_TOLERANCE: f64 = 1e-6;

    pub fn new(weights: Vec<f64>) -> IndexingResult<Self> {
        if weights.is_empty() {
            return Err(IndexingError::InvalidInput(
                "benchmark weights are empty".to_string(),
            ));
        }
        if let Some((i, w)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(IndexingError::InvalidInput(format!(
                "benchmark weight {} at position {} is negative or not finite",
                w, i
            )));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(IndexingError::InvalidInput(format!(
                "benchmark weights sum to {:.8}, expected 1",
                total
            )));
        }
        Ok(Self(weights))
    }

    /// Reindex a ticker map onto the universe; tickers absent from the map get zero.
    pub fn from_map(universe: &Universe, weights: &BTreeMap<String, f64>) -> IndexingResult<Self> {
        if let Some(unknown) = weights.keys().find(|t| universe.index_of(t).is_none()) {
            return Err(IndexingError::InvalidInput(format!(
                "benchmark weight given for {} which is not in the universe",
                unknown
            )));
        }
        let aligned = universe
            .tickers()
            .map(|t| weights.get(t).copied().unwrap_or(0.0))
            .collect();
        Self::new(aligned)
    }

    pub fn equal(n: usize) -> IndexingResult<Self> {
        if n == 0 {
            return Err(IndexingError::InvalidInput(
                "cannot build equal weights over zero instruments".to_string(),
            ));
        }
        Self::new(vec![1.0 / n as f64; n])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ensure_matches(&self, universe: &Universe) -> IndexingResult<()> {
        if self.0.len() != universe.len() {
            return Err(IndexingError::InvalidInput(format!(
                "benchmark has {} weights but universe has {} instruments",
                self.0.len(),
                universe.len()
            )));
        }
        Ok(())
    }
}

/// Per-period returns of one instrument, in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    pub ticker: String,
    returns: Vec<f64>,
}

impl ReturnSeries {
    pub fn new(ticker: impl Into<String>, returns: Vec<f64>) -> Self {
        Self {
            ticker: ticker.into(),
            returns,
        }
    }

    /// Simple returns from a price path; non-positive prices are rejected.
    pub fn from_prices(ticker: impl Into<String>, prices: &[f64]) -> IndexingResult<Self> {
        let ticker = ticker.into();
        if let Some(p) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
            return Err(IndexingError::InvalidInput(format!(
                "{} has a non-positive or non-finite price {}",
                ticker, p
            )));
        }
        let returns = prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
        Ok(Self { ticker, returns })
    }

    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// Compounded return over the whole series.
    pub fn cumulative(&self) -> f64 {
        self.returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_universe() -> Universe {
        Universe::new(vec![
            Instrument::new("A", "Tech"),
            Instrument::new("B", "Tech"),
            Instrument::new("C", "Energy"),
            Instrument::new("D", "Energy"),
        ])
        .unwrap()
    }

    #[test]
    fn test_universe_rejects_duplicates() {
        let result = Universe::new(vec![Instrument::new("A", "Tech"), Instrument::new("A", "Energy")]);
        assert!(matches!(result, Err(IndexingError::InvalidInput(_))));
    }

    #[test]
    fn test_universe_lookup() {
        let universe = sample_universe();
        assert_eq!(universe.index_of("C"), Some(2));
        assert_eq!(universe.sector_of("B"), Some("Tech"));
        assert_eq!(universe.sectors(), vec!["Energy".to_string(), "Tech".to_string()]);
        assert_eq!(universe.indices_in_sector("Energy"), vec![2, 3]);
    }

    #[test]
    fn test_sector_exclusion_is_alias_aware() {
        let universe = Universe::new(vec![
            Instrument::new("AAPL", "Information Technology"),
            Instrument::new("XOM", "Energy"),
        ])
        .unwrap();
        let exclusions = ExclusionSet::new().with_sector("technology");
        assert_eq!(exclusions.excluded_indices(&universe), vec![0]);
    }

    #[test]
    fn test_ticker_exclusion_and_unmatched() {
        let universe = sample_universe();
        let exclusions = ExclusionSet::new().with_ticker("B").with_ticker("ZZZ");
        assert_eq!(exclusions.excluded_indices(&universe), vec![1]);
        assert_eq!(exclusions.unmatched(&universe), vec!["ZZZ".to_string()]);
    }

    #[test]
    fn test_benchmark_validation() {
        assert!(BenchmarkWeights::new(vec![0.4, 0.3, 0.2, 0.1]).is_ok());
        assert!(BenchmarkWeights::new(vec![0.5, 0.3]).is_err());
        assert!(BenchmarkWeights::new(vec![1.2, -0.2]).is_err());
    }

    #[test]
    fn test_benchmark_from_map_fills_zeros() {
        let universe = sample_universe();
        let mut map = BTreeMap::new();
        map.insert("A".to_string(), 0.6);
        map.insert("D".to_string(), 0.4);
        let weights = BenchmarkWeights::from_map(&universe, &map).unwrap();
        assert_eq!(weights.as_slice(), &[0.6, 0.0, 0.0, 0.4]);
    }

    #[test]
    fn test_aggregate_by_sector() {
        let universe = sample_universe();
        let sums = universe.aggregate_by_sector(&[0.4, 0.3, 0.2, 0.1]);
        assert_relative_eq!(sums["Tech"], 0.7, epsilon = 1e-12);
        assert_relative_eq!(sums["Energy"], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_sector_aliases_group_together() {
        let universe = Universe::new(vec![
            Instrument::new("A", "Tech"),
            Instrument::new("B", "Information Technology"),
            Instrument::new("C", "Energy"),
        ])
        .unwrap();
        assert_eq!(universe.sectors(), vec!["Energy".to_string(), "Tech".to_string()]);
        assert_eq!(universe.indices_in_sector("information technology"), vec![0, 1]);
        assert_eq!(universe.sector_label("Technology"), Some("Tech".to_string()));
        assert_eq!(universe.sector_label("Utilities"), None);

        let sums = universe.aggregate_by_sector(&[0.2, 0.5, 0.3]);
        assert_eq!(sums.len(), 2);
        assert_relative_eq!(sums["Tech"], 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_benchmark_deserialization_validates() {
        let ok: BenchmarkWeights = serde_json::from_str("[0.25, 0.75]").unwrap();
        assert_eq!(ok.as_slice(), &[0.25, 0.75]);
        assert!(serde_json::from_str::<BenchmarkWeights>("[1.2, -0.2]").is_err());
        assert!(serde_json::from_str::<BenchmarkWeights>("[0.5, 0.3]").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "[0.25,0.75]");
    }

    #[test]
    fn test_return_series_from_prices() {
        let series = ReturnSeries::from_prices("A", &[100.0, 110.0, 99.0]).unwrap();
        assert_eq!(series.len(), 2);
        assert_relative_eq!(series.returns()[0], 0.10, epsilon = 1e-12);
        assert_relative_eq!(series.cumulative(), -0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_universe_serde_roundtrip_validates() {
        let json = r#"[{"ticker":"A","sector":"Tech"},{"ticker":"A","sector":"Tech"}]"#;
        assert!(serde_json::from_str::<Universe>(json).is_err());
    }
}
