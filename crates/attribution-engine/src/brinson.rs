//! Brinson-Fachler sector attribution.
//!
//! Per sector `s` with portfolio/benchmark weights `w_p,s`, `w_b,s` and
//! returns `R_p,s`, `R_b,s` against the benchmark total `R_b`:
//!
//! - allocation = `(w_p,s − w_b,s)(R_b,s − R_b)`
//! - selection  = `w_p,s (R_p,s − R_b,s)`, i.e. the benchmark-weighted
//!   selection term plus the interaction `(w_p,s − w_b,s)(R_p,s − R_b,s)`
//!
//! The interaction part is also reported on its own, but it is already inside
//! selection, so `Σ allocation + Σ selection = R_p − R_b` exactly.

use crate::contributors::{
    instrument_contributions, top_contributors, top_detractors, InstrumentContribution,
};
use index_core::{
    canonical_sector, BenchmarkWeights, ExclusionSet, IndexingError, IndexingResult, Universe,
    ATTRIBUTION_CLOSURE_TOLERANCE, WEIGHT_SUM_TOLERANCE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttributionSettings {
    /// Sectors and instruments surfaced as top contributors/detractors
    pub top_k: usize,
    pub closure_tolerance: f64,
}

impl Default for AttributionSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            closure_tolerance: ATTRIBUTION_CLOSURE_TOLERANCE,
        }
    }
}

/// Realized weights and returns of one sector over the attribution period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorInput {
    pub sector: String,
    pub portfolio_weight: f64,
    pub benchmark_weight: f64,
    pub portfolio_return: f64,
    pub benchmark_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorEffect {
    pub sector: String,
    pub portfolio_weight: f64,
    pub benchmark_weight: f64,
    pub portfolio_return: f64,
    pub benchmark_return: f64,
    pub allocation: f64,
    /// Includes the interaction component
    pub selection: f64,
    pub interaction_component: f64,
    /// `allocation + selection`
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    /// One entry per sector, sorted by sector label
    pub sectors: Vec<SectorEffect>,
    pub portfolio_return: f64,
    pub benchmark_return: f64,
    pub active_return: f64,
    pub allocation_effect: f64,
    pub selection_effect: f64,
    /// Share of `selection_effect` due to interaction
    pub interaction_effect: f64,
    /// Sectors ranked by |allocation + selection|, top-K
    pub top_sectors: Vec<SectorEffect>,
    pub top_contributors: Vec<InstrumentContribution>,
    pub top_detractors: Vec<InstrumentContribution>,
}

impl AttributionResult {
    /// One-line summary of the totals.
    pub fn narrative(&self) -> String {
        format!(
            "Total Active Return: {:.4}. Allocation Effect: {:.4}. Selection Effect: {:.4}.",
            self.active_return, self.allocation_effect, self.selection_effect
        )
    }

    pub fn sector(&self, sector: &str) -> Option<&SectorEffect> {
        self.sectors.iter().find(|s| s.sector == sector)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttributionEngine {
    settings: AttributionSettings,
}

impl AttributionEngine {
    pub fn new(settings: AttributionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AttributionSettings {
        &self.settings
    }

    /// Attribution from instrument weights and realized sector returns.
    ///
    /// Every sector of the universe needs a benchmark return; a portfolio
    /// return is needed only where the portfolio holds weight (unheld sectors
    /// take the benchmark return so their selection effect is zero).
    pub fn attribute(
        &self,
        universe: &Universe,
        portfolio_weights: &[f64],
        benchmark: &BenchmarkWeights,
        portfolio_sector_returns: &BTreeMap<String, f64>,
        benchmark_sector_returns: &BTreeMap<String, f64>,
        benchmark_total: f64,
    ) -> IndexingResult<AttributionResult> {
        check_weights(universe, portfolio_weights, benchmark)?;
        let wp = universe.aggregate_by_sector(portfolio_weights);
        let wb = universe.aggregate_by_sector(benchmark.as_slice());

        for sector in benchmark_sector_returns.keys().chain(portfolio_sector_returns.keys()) {
            if universe.sector_label(sector).is_none() {
                tracing::warn!("Sector return for {} ignored: not in the universe", sector);
            }
        }
        let benchmark_returns = by_canonical_sector(benchmark_sector_returns)?;
        let portfolio_returns = by_canonical_sector(portfolio_sector_returns)?;

        let mut inputs = Vec::with_capacity(wb.len());
        for (sector, benchmark_weight) in &wb {
            let key = canonical_sector(sector);
            let benchmark_return = *benchmark_returns.get(&key).ok_or_else(|| {
                IndexingError::DataMismatch(format!("no benchmark return for sector {}", sector))
            })?;
            let portfolio_weight = wp.get(sector).copied().unwrap_or(0.0);
            let portfolio_return = match portfolio_returns.get(&key) {
                Some(r) => *r,
                None if portfolio_weight <= 0.0 => benchmark_return,
                None => {
                    return Err(IndexingError::DataMismatch(format!(
                        "no portfolio return for held sector {}",
                        sector
                    )))
                }
            };
            inputs.push(SectorInput {
                sector: sector.clone(),
                portfolio_weight,
                benchmark_weight: *benchmark_weight,
                portfolio_return,
                benchmark_return,
            });
        }

        self.attribute_sectors(&inputs, benchmark_total)
    }

    /// Attribution from per-instrument realized returns; sector returns are
    /// weight-averaged within each sector and instrument contributions are
    /// ranked alongside the sector effects.
    pub fn attribute_holdings(
        &self,
        universe: &Universe,
        portfolio_weights: &[f64],
        benchmark: &BenchmarkWeights,
        instrument_returns: &[f64],
        exclusions: &ExclusionSet,
    ) -> IndexingResult<AttributionResult> {
        check_weights(universe, portfolio_weights, benchmark)?;
        if instrument_returns.len() != universe.len() {
            return Err(IndexingError::DataMismatch(format!(
                "{} instrument returns for a universe of {}",
                instrument_returns.len(),
                universe.len()
            )));
        }
        if let Some(i) = instrument_returns.iter().position(|r| !r.is_finite()) {
            return Err(IndexingError::DataMismatch(format!(
                "realized return for {} is not finite",
                universe.instruments()[i].ticker
            )));
        }

        let wb_slice = benchmark.as_slice();
        let mut inputs = Vec::new();
        for sector in universe.sectors() {
            let members = universe.indices_in_sector(&sector);
            let portfolio_weight: f64 = members.iter().map(|&i| portfolio_weights[i]).sum();
            let benchmark_weight: f64 = members.iter().map(|&i| wb_slice[i]).sum();
            let weighted = |weights: &[f64], total: f64| {
                members
                    .iter()
                    .map(|&i| weights[i] * instrument_returns[i])
                    .sum::<f64>()
                    / total
            };
            let equal_weighted =
                members.iter().map(|&i| instrument_returns[i]).sum::<f64>() / members.len() as f64;

            let benchmark_return = if benchmark_weight > 0.0 {
                weighted(wb_slice, benchmark_weight)
            } else {
                equal_weighted
            };
            let portfolio_return = if portfolio_weight > 0.0 {
                weighted(portfolio_weights, portfolio_weight)
            } else {
                benchmark_return
            };
            inputs.push(SectorInput {
                sector,
                portfolio_weight,
                benchmark_weight,
                portfolio_return,
                benchmark_return,
            });
        }

        let benchmark_total: f64 = wb_slice
            .iter()
            .zip(instrument_returns)
            .map(|(w, r)| w * r)
            .sum();

        let mut result = self.attribute_sectors(&inputs, benchmark_total)?;
        let contributions = instrument_contributions(
            universe,
            portfolio_weights,
            wb_slice,
            instrument_returns,
            exclusions,
        );
        result.top_contributors = top_contributors(&contributions, self.settings.top_k);
        result.top_detractors = top_detractors(&contributions, self.settings.top_k);
        Ok(result)
    }

    /// Brinson-Fachler over explicit sector rows.
    pub fn attribute_sectors(
        &self,
        inputs: &[SectorInput],
        benchmark_total: f64,
    ) -> IndexingResult<AttributionResult> {
        validate_inputs(inputs, benchmark_total)?;

        let implied_benchmark: f64 = inputs
            .iter()
            .map(|s| s.benchmark_weight * s.benchmark_return)
            .sum();
        if (implied_benchmark - benchmark_total).abs() > self.settings.closure_tolerance {
            return Err(IndexingError::DataMismatch(format!(
                "benchmark total {:.8} disagrees with sector returns ({:.8})",
                benchmark_total, implied_benchmark
            )));
        }

        let mut sectors: Vec<SectorEffect> = inputs
            .iter()
            .map(|s| {
                let active_weight = s.portfolio_weight - s.benchmark_weight;
                let allocation = active_weight * (s.benchmark_return - benchmark_total);
                let selection = s.portfolio_weight * (s.portfolio_return - s.benchmark_return);
                SectorEffect {
                    sector: s.sector.clone(),
                    portfolio_weight: s.portfolio_weight,
                    benchmark_weight: s.benchmark_weight,
                    portfolio_return: s.portfolio_return,
                    benchmark_return: s.benchmark_return,
                    allocation,
                    selection,
                    interaction_component: active_weight
                        * (s.portfolio_return - s.benchmark_return),
                    total: allocation + selection,
                }
            })
            .collect();
        sectors.sort_by(|a, b| a.sector.cmp(&b.sector));

        let portfolio_return: f64 = inputs
            .iter()
            .map(|s| s.portfolio_weight * s.portfolio_return)
            .sum();
        let active_return = portfolio_return - benchmark_total;
        let allocation_effect: f64 = sectors.iter().map(|s| s.allocation).sum();
        let selection_effect: f64 = sectors.iter().map(|s| s.selection).sum();
        let interaction_effect: f64 = sectors.iter().map(|s| s.interaction_component).sum();

        let closure = allocation_effect + selection_effect - active_return;
        if closure.abs() > self.settings.closure_tolerance {
            return Err(IndexingError::invariant_violation(format!(
                "attribution effects miss the active return by {:.3e}",
                closure
            )));
        }

        let mut top_sectors = sectors.clone();
        top_sectors.sort_by(|a, b| {
            b.total
                .abs()
                .total_cmp(&a.total.abs())
                .then_with(|| a.sector.cmp(&b.sector))
        });
        top_sectors.truncate(self.settings.top_k);

        tracing::info!(
            "Attribution over {} sectors: active {:.6}, allocation {:.6}, selection {:.6} (interaction {:.6})",
            sectors.len(),
            active_return,
            allocation_effect,
            selection_effect,
            interaction_effect
        );

        Ok(AttributionResult {
            sectors,
            portfolio_return,
            benchmark_return: benchmark_total,
            active_return,
            allocation_effect,
            selection_effect,
            interaction_effect,
            top_sectors,
            top_contributors: Vec::new(),
            top_detractors: Vec::new(),
        })
    }
}

/// Re-key sector returns by canonical sector; aliases must agree.
fn by_canonical_sector(returns: &BTreeMap<String, f64>) -> IndexingResult<BTreeMap<String, f64>> {
    let mut out: BTreeMap<String, f64> = BTreeMap::new();
    for (sector, r) in returns {
        let key = canonical_sector(sector);
        match out.get(&key) {
            Some(existing) if existing != r => {
                return Err(IndexingError::DataMismatch(format!(
                    "sector {} has conflicting returns {} and {} under different labels",
                    sector, existing, r
                )));
            }
            _ => {
                out.insert(key, *r);
            }
        }
    }
    Ok(out)
}

fn check_weights(
    universe: &Universe,
    portfolio_weights: &[f64],
    benchmark: &BenchmarkWeights,
) -> IndexingResult<()> {
    benchmark.ensure_matches(universe)?;
    if portfolio_weights.len() != universe.len() {
        return Err(IndexingError::DataMismatch(format!(
            "{} portfolio weights for a universe of {}",
            portfolio_weights.len(),
            universe.len()
        )));
    }
    Ok(())
}

fn validate_inputs(inputs: &[SectorInput], benchmark_total: f64) -> IndexingResult<()> {
    if inputs.is_empty() {
        return Err(IndexingError::DataMismatch("no sectors to attribute".to_string()));
    }
    if !benchmark_total.is_finite() {
        return Err(IndexingError::DataMismatch(
            "benchmark total return is not finite".to_string(),
        ));
    }
    let mut seen = BTreeSet::new();
    for s in inputs {
        if !seen.insert(s.sector.as_str()) {
            return Err(IndexingError::InvalidInput(format!(
                "sector {} appears twice",
                s.sector
            )));
        }
        let values = [
            s.portfolio_weight,
            s.benchmark_weight,
            s.portfolio_return,
            s.benchmark_return,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(IndexingError::DataMismatch(format!(
                "sector {} has a non-finite weight or return",
                s.sector
            )));
        }
        if s.portfolio_weight < -WEIGHT_SUM_TOLERANCE || s.benchmark_weight < 0.0 {
            return Err(IndexingError::InvalidInput(format!(
                "sector {} has a negative weight",
                s.sector
            )));
        }
    }

    for (label, total) in [
        ("portfolio", inputs.iter().map(|s| s.portfolio_weight).sum::<f64>()),
        ("benchmark", inputs.iter().map(|s| s.benchmark_weight).sum::<f64>()),
    ] {
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(IndexingError::InvalidInput(format!(
                "{} sector weights sum to {:.8}",
                label, total
            )));
        }
    }
    Ok(())
}
