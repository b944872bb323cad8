use index_core::{BenchmarkWeights, Universe, PERIODS_PER_YEAR};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    /// Interior-point solve reached the gap and feasibility tolerances
    Optimal,
    /// One instrument left after exclusions; the budget fixes the answer
    Trivial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverDiagnostics {
    pub iterations: usize,
    pub primal_residual: f64,
    pub dual_residual: f64,
    pub duality_gap: f64,
    /// Worst constraint violation of the returned weights
    pub max_violation: f64,
    pub active_instruments: usize,
    pub constraint_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub sector: String,
    pub weight: f64,
    pub benchmark_weight: f64,
    pub active_weight: f64,
}

/// Optimal weights over the full universe plus tracking statistics.
///
/// Excluded instruments carry a weight of exactly `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub(crate) tickers: Vec<String>,
    pub(crate) weights: Vec<f64>,
    pub(crate) excluded: Vec<String>,
    pub(crate) tracking_error_variance: f64,
    pub(crate) tracking_error: f64,
    pub(crate) status: SolverStatus,
    pub(crate) diagnostics: SolverDiagnostics,
}

impl OptimizationResult {
    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weight_of(&self, ticker: &str) -> Option<f64> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|i| self.weights[i])
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// `(w - w_b)ᵀ Σ (w - w_b)` per period
    pub fn tracking_error_variance(&self) -> f64 {
        self.tracking_error_variance
    }

    pub fn tracking_error(&self) -> f64 {
        self.tracking_error
    }

    pub fn annualized_tracking_error(&self) -> f64 {
        self.tracking_error * PERIODS_PER_YEAR.sqrt()
    }

    pub fn status(&self) -> SolverStatus {
        self.status
    }

    pub fn diagnostics(&self) -> &SolverDiagnostics {
        &self.diagnostics
    }

    pub fn active_weights(&self, benchmark: &BenchmarkWeights) -> Vec<f64> {
        self.weights
            .iter()
            .zip(benchmark.as_slice())
            .map(|(w, b)| w - b)
            .collect()
    }

    /// Positions at or above `min_weight`, largest first.
    pub fn holdings(
        &self,
        universe: &Universe,
        benchmark: &BenchmarkWeights,
        min_weight: f64,
    ) -> Vec<Holding> {
        let mut holdings: Vec<Holding> = universe
            .instruments()
            .iter()
            .zip(self.weights.iter().zip(benchmark.as_slice()))
            .filter(|(_, (w, _))| **w >= min_weight && **w > 0.0)
            .map(|(instrument, (w, b))| Holding {
                ticker: instrument.ticker.clone(),
                sector: instrument.sector.clone(),
                weight: *w,
                benchmark_weight: *b,
                active_weight: w - b,
            })
            .collect();
        holdings.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.ticker.cmp(&b.ticker)));
        holdings
    }
}
