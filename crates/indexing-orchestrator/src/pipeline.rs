//! Request pipeline: risk model, then optimizer and harvester side by side,
//! then attribution on the optimized weights.

use crate::commentary::{CommentaryDispatch, CommentaryHandoff, CommentaryRequest};
use crate::config::EngineConfig;
use crate::pool::SolvePool;
use attribution_engine::contributors::HELD_WEIGHT_THRESHOLD;
use attribution_engine::{AttributionEngine, AttributionResult};
use chrono::NaiveDate;
use index_core::{
    BenchmarkWeights, ExclusionSet, IndexingError, IndexingResult, ReturnSeries, Universe,
};
use portfolio_optimizer::{Holding, OptimizationResult, PortfolioConstraints, PortfolioOptimizer};
use risk_model::{LedoitWolf, ReturnMatrix, ShrinkageEstimate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tax_optimizer::{HarvestInputs, HarvestReport, HarvestingEngine, Lot, TradeRecord, WashSaleHistory};

/// Realized returns for the attribution period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RealizedReturns {
    /// Per-instrument period returns; every universe ticker must be present
    Instruments { returns: BTreeMap<String, f64> },
    /// Sector-level returns with the benchmark's total
    Sectors {
        portfolio: BTreeMap<String, f64>,
        benchmark: BTreeMap<String, f64>,
        benchmark_total: f64,
    },
}

/// One client's request, with all market data already resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingRequest {
    pub client_id: String,
    pub as_of: NaiveDate,
    pub universe: Universe,
    /// Tickers missing from the map get zero benchmark weight
    pub benchmark_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub exclusions: ExclusionSet,
    /// Overrides the engine's default constraints
    #[serde(default)]
    pub constraints: Option<PortfolioConstraints>,
    /// Return history per ticker, equal lengths
    pub returns: Vec<ReturnSeries>,
    #[serde(default)]
    pub lots: Vec<Lot>,
    #[serde(default)]
    pub prices: BTreeMap<String, f64>,
    #[serde(default)]
    pub trade_history: Vec<TradeRecord>,
    /// Defaults to the trailing window of `returns`
    #[serde(default)]
    pub realized: Option<RealizedReturns>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub shrinkage_intensity: f64,
    pub raw_intensity: f64,
    pub average_correlation: f64,
    pub observations: usize,
    pub instruments: usize,
    pub condition_number: f64,
}

impl RiskSummary {
    /// `condition_number` is computed with the estimate on the solve pool.
    pub fn new(estimate: &ShrinkageEstimate, condition_number: f64) -> Self {
        Self {
            shrinkage_intensity: estimate.intensity,
            raw_intensity: estimate.raw_intensity,
            average_correlation: estimate.average_correlation,
            observations: estimate.observations,
            instruments: estimate.instruments,
            condition_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttributionOutcome {
    Completed { result: AttributionResult },
    Failed { kind: String, error: String },
}

impl AttributionOutcome {
    pub fn result(&self) -> Option<&AttributionResult> {
        match self {
            AttributionOutcome::Completed { result } => Some(result),
            AttributionOutcome::Failed { .. } => None,
        }
    }
}

impl From<IndexingResult<AttributionResult>> for AttributionOutcome {
    fn from(result: IndexingResult<AttributionResult>) -> Self {
        match result {
            Ok(result) => AttributionOutcome::Completed { result },
            Err(e) => AttributionOutcome::Failed {
                kind: e.kind().to_string(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarvestOutcome {
    Completed { report: HarvestReport },
    Failed { kind: String, error: String },
}

impl HarvestOutcome {
    pub fn report(&self) -> Option<&HarvestReport> {
        match self {
            HarvestOutcome::Completed { report } => Some(report),
            HarvestOutcome::Failed { .. } => None,
        }
    }
}

impl From<IndexingResult<HarvestReport>> for HarvestOutcome {
    fn from(result: IndexingResult<HarvestReport>) -> Self {
        match result {
            Ok(report) => HarvestOutcome::Completed { report },
            Err(e) => HarvestOutcome::Failed {
                kind: e.kind().to_string(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingResponse {
    pub client_id: String,
    pub as_of: NaiveDate,
    pub risk: RiskSummary,
    pub optimization: OptimizationResult,
    /// Positions above the display threshold, largest first
    pub holdings: Vec<Holding>,
    pub attribution: AttributionOutcome,
    pub harvest: HarvestOutcome,
    pub commentary: CommentaryDispatch,
}

pub struct IndexingPipeline {
    config: EngineConfig,
    pool: SolvePool,
    commentary: Option<CommentaryHandoff>,
}

impl IndexingPipeline {
    pub fn new(config: EngineConfig) -> Self {
        let pool = SolvePool::new(config.solver_workers);
        Self {
            config,
            pool,
            commentary: None,
        }
    }

    /// Share a pool with other pipelines
    pub fn with_pool(mut self, pool: SolvePool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_commentary(mut self, handoff: CommentaryHandoff) -> Self {
        self.commentary = Some(handoff);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &SolvePool {
        &self.pool
    }

    /// Run one request end to end.
    ///
    /// Risk-model and optimizer failures are returned as errors. Attribution
    /// and harvesting failures are reported inside the response.
    pub async fn run(&self, request: IndexingRequest) -> IndexingResult<IndexingResponse> {
        let IndexingRequest {
            client_id,
            as_of,
            universe,
            benchmark_weights,
            exclusions,
            constraints,
            returns,
            lots,
            prices,
            trade_history,
            realized,
        } = request;

        tracing::info!(
            "Indexing request {}: {} instruments, {} lots, exclusions: {}",
            client_id,
            universe.len(),
            lots.len(),
            exclusions.describe()
        );

        let universe = Arc::new(universe);
        let benchmark = Arc::new(BenchmarkWeights::from_map(&universe, &benchmark_weights)?);
        let exclusions = Arc::new(exclusions);
        let history = ReturnMatrix::from_series(&returns)?.align_to(&universe)?;
        let trailing = history.tail(self.config.attribution_lookback).cumulative_returns();

        let shrinkage = self.config.shrinkage.clone();
        let (estimate, condition_number, correlation) = self
            .pool
            .run("shrinkage", move || {
                let estimate = LedoitWolf::with_settings(shrinkage).shrink(&history)?;
                let condition_number = estimate.covariance.condition_number();
                let correlation = estimate.covariance.correlation();
                Ok((estimate, condition_number, correlation))
            })
            .await?;
        let risk = RiskSummary::new(&estimate, condition_number);
        let covariance = Arc::new(estimate.covariance);

        let optimize = {
            let optimizer = PortfolioOptimizer::with_settings(self.config.solver);
            let constraints = constraints.unwrap_or_else(|| self.config.constraints.clone());
            let universe = Arc::clone(&universe);
            let covariance = Arc::clone(&covariance);
            let benchmark = Arc::clone(&benchmark);
            let exclusions = Arc::clone(&exclusions);
            self.pool.run("optimize", move || {
                optimizer.optimize_with(&universe, &covariance, &benchmark, &exclusions, &constraints)
            })
        };
        let harvest = {
            let engine = HarvestingEngine::new(
                self.config.tax_rules.clone(),
                self.config.harvesting.clone(),
            );
            let history = WashSaleHistory::from_trades(trade_history);
            let universe = Arc::clone(&universe);
            let exclusions = Arc::clone(&exclusions);
            self.pool.run("harvest", move || {
                engine.find_candidates(&HarvestInputs {
                    lots: &lots,
                    prices: &prices,
                    history: &history,
                    universe: universe.as_ref(),
                    correlation: Some(&correlation),
                    exclusions: exclusions.as_ref(),
                    as_of,
                })
            })
        };
        let (optimization, harvest) = tokio::join!(optimize, harvest);

        let optimization = optimization?;
        if let Err(e) = &harvest {
            tracing::warn!("Harvest scan for {} failed: {}", client_id, e);
        }
        let harvest = HarvestOutcome::from(harvest);

        let attribution = self.attribute(
            &universe,
            optimization.weights(),
            &benchmark,
            &exclusions,
            realized,
            &trailing,
        );
        if let Err(e) = &attribution {
            tracing::warn!("Attribution for {} failed ({}): {}", client_id, e.kind(), e);
        }
        let attribution = AttributionOutcome::from(attribution);

        let commentary = match (&self.commentary, attribution.result()) {
            (Some(handoff), Some(result)) => handoff.submit(CommentaryRequest::build(
                &client_id,
                result,
                &exclusions.describe(),
                self.config.attribution_lookback,
                as_of,
            )),
            _ => CommentaryDispatch::Skipped,
        };

        let holdings = optimization.holdings(&universe, &benchmark, HELD_WEIGHT_THRESHOLD);
        tracing::info!(
            "Request {} complete: {} holdings, annualized TE {:.4}%, {} harvest candidates, commentary {:?}",
            client_id,
            holdings.len(),
            optimization.annualized_tracking_error() * 100.0,
            harvest.report().map(|r| r.candidates.len()).unwrap_or(0),
            commentary
        );

        Ok(IndexingResponse {
            client_id,
            as_of,
            risk,
            optimization,
            holdings,
            attribution,
            harvest,
            commentary,
        })
    }

    fn attribute(
        &self,
        universe: &Universe,
        weights: &[f64],
        benchmark: &BenchmarkWeights,
        exclusions: &ExclusionSet,
        realized: Option<RealizedReturns>,
        trailing: &[f64],
    ) -> IndexingResult<AttributionResult> {
        let engine = AttributionEngine::new(self.config.attribution);
        match realized {
            None => engine.attribute_holdings(universe, weights, benchmark, trailing, exclusions),
            Some(RealizedReturns::Instruments { returns }) => {
                let aligned = align_returns(universe, &returns)?;
                engine.attribute_holdings(universe, weights, benchmark, &aligned, exclusions)
            }
            Some(RealizedReturns::Sectors {
                portfolio,
                benchmark: benchmark_sectors,
                benchmark_total,
            }) => engine.attribute(
                universe,
                weights,
                benchmark,
                &portfolio,
                &benchmark_sectors,
                benchmark_total,
            ),
        }
    }
}

/// Instrument returns in universe order; a missing ticker is a coverage gap.
fn align_returns(universe: &Universe, returns: &BTreeMap<String, f64>) -> IndexingResult<Vec<f64>> {
    let missing: Vec<&str> = universe
        .tickers()
        .filter(|t| !returns.contains_key(*t))
        .collect();
    if !missing.is_empty() {
        return Err(IndexingError::DataMismatch(format!(
            "no realized return for {} of {} instruments ({})",
            missing.len(),
            universe.len(),
            missing.join(", ")
        )));
    }
    Ok(universe.tickers().map(|t| returns[t]).collect())
}
