//! Return panels (T periods × N instruments).

use index_core::{IndexingError, IndexingResult, ReturnSeries, Universe};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Summary statistics of one instrument's return column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator)
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Immutable T×N matrix of per-period returns; row = period, column = instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    tickers: Vec<String>,
    data: DMatrix<f64>,
}

impl ReturnMatrix {
    /// Build from row-major observations (`rows[t][i]` is instrument `i` in period `t`).
    pub fn from_rows(tickers: Vec<String>, rows: &[Vec<f64>]) -> IndexingResult<Self> {
        let n = tickers.len();
        if n == 0 {
            return Err(IndexingError::InvalidInput(
                "return matrix needs at least one instrument".to_string(),
            ));
        }
        if let Some((t, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(IndexingError::InvalidInput(format!(
                "period {} has {} returns, expected {}",
                t,
                row.len(),
                n
            )));
        }
        let data = DMatrix::from_fn(rows.len(), n, |t, i| rows[t][i]);
        Self::from_matrix(tickers, data)
    }

    /// Build from per-instrument series, which must all have the same length.
    pub fn from_series(series: &[ReturnSeries]) -> IndexingResult<Self> {
        let first = series.first().ok_or_else(|| {
            IndexingError::InvalidInput("return matrix needs at least one series".to_string())
        })?;
        let periods = first.len();
        if let Some(bad) = series.iter().find(|s| s.len() != periods) {
            return Err(IndexingError::InvalidInput(format!(
                "series {} has {} periods, expected {} like {}",
                bad.ticker,
                bad.len(),
                periods,
                first.ticker
            )));
        }
        let tickers = series.iter().map(|s| s.ticker.clone()).collect();
        let data = DMatrix::from_fn(periods, series.len(), |t, i| series[i].returns()[t]);
        Self::from_matrix(tickers, data)
    }

    pub fn from_matrix(tickers: Vec<String>, data: DMatrix<f64>) -> IndexingResult<Self> {
        if tickers.len() != data.ncols() {
            return Err(IndexingError::InvalidInput(format!(
                "{} tickers for a matrix with {} columns",
                tickers.len(),
                data.ncols()
            )));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            let (t, i) = (pos % data.nrows(), pos / data.nrows());
            return Err(IndexingError::InvalidInput(format!(
                "non-finite return for {} in period {}",
                tickers[i], t
            )));
        }
        Ok(Self { tickers, data })
    }

    pub fn observations(&self) -> usize {
        self.data.nrows()
    }

    pub fn instruments(&self) -> usize {
        self.data.ncols()
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Reorder columns to the universe's index space.
    pub fn align_to(&self, universe: &Universe) -> IndexingResult<Self> {
        let mut positions = Vec::with_capacity(universe.len());
        for ticker in universe.tickers() {
            let pos = self
                .tickers
                .iter()
                .position(|t| t == ticker)
                .ok_or_else(|| {
                    IndexingError::InsufficientData(format!("no return history for {}", ticker))
                })?;
            positions.push(pos);
        }
        let data = DMatrix::from_fn(self.observations(), positions.len(), |t, i| {
            self.data[(t, positions[i])]
        });
        Ok(Self {
            tickers: universe.tickers().map(str::to_string).collect(),
            data,
        })
    }

    /// Keep only the most recent `periods` rows.
    pub fn tail(&self, periods: usize) -> Self {
        let keep = periods.min(self.observations());
        let start = self.observations() - keep;
        Self {
            tickers: self.tickers.clone(),
            data: self.data.rows(start, keep).into_owned(),
        }
    }

    /// Compounded return of every column over the whole window.
    pub fn cumulative_returns(&self) -> Vec<f64> {
        self.data
            .column_iter()
            .map(|col| col.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0)
            .collect()
    }

    /// Per-column mean, sample deviation and range, in column order.
    pub fn column_stats(&self) -> Vec<ColumnStats> {
        self.data
            .column_iter()
            .map(|col| {
                let values: Vec<f64> = col.iter().copied().collect();
                let slice = values.as_slice();
                ColumnStats {
                    mean: Statistics::mean(slice),
                    std_dev: Statistics::std_dev(slice),
                    min: Statistics::min(slice),
                    max: Statistics::max(slice),
                }
            })
            .collect()
    }

    /// Returns with each column's mean removed.
    pub fn centered(&self) -> DMatrix<f64> {
        let mut centered = self.data.clone();
        for mut col in centered.column_iter_mut() {
            let mean = col.sum() / col.nrows() as f64;
            col.add_scalar_mut(-mean);
        }
        centered
    }
}
