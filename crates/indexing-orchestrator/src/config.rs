use attribution_engine::AttributionSettings;
use index_core::{IndexingError, IndexingResult};
use portfolio_optimizer::{MaxWeight, PortfolioConstraints, SolverSettings};
use risk_model::ShrinkageSettings;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tax_optimizer::{HarvestingConfig, TaxRules};

/// Engine-wide settings, one section per component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub shrinkage: ShrinkageSettings,
    pub solver: SolverSettings,
    /// Concurrent CPU-bound solves
    pub solver_workers: usize,
    /// Constraints applied when a request brings none of its own
    pub constraints: PortfolioConstraints,
    pub tax_rules: TaxRules,
    pub harvesting: HarvestingConfig,
    pub attribution: AttributionSettings,
    /// Trailing periods compounded into realized returns when a request
    /// carries no explicit attribution data
    pub attribution_lookback: usize,
    pub commentary_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shrinkage: ShrinkageSettings::default(),
            solver: SolverSettings::default(),
            solver_workers: default_workers(),
            constraints: PortfolioConstraints::default(),
            tax_rules: TaxRules::us(),
            harvesting: HarvestingConfig::default(),
            attribution: AttributionSettings::default(),
            attribution_lookback: 30,
            commentary_queue_capacity: 32,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> IndexingResult<Self> {
        let defaults = Self::default();

        let mut solver = defaults.solver;
        solver.max_iterations = parse_var("SOLVER_MAX_ITERATIONS", solver.max_iterations)?;
        solver.eps_abs = parse_var("SOLVER_EPS_ABS", solver.eps_abs)?;
        solver.eps_rel = parse_var("SOLVER_EPS_REL", solver.eps_rel)?;
        solver.eps_feasibility = parse_var("SOLVER_EPS_FEASIBILITY", solver.eps_feasibility)?;
        solver.validate()?;

        let mut tax_rules = defaults.tax_rules;
        tax_rules.wash_sale_window_days =
            parse_var("WASH_SALE_WINDOW_DAYS", tax_rules.wash_sale_window_days)?;
        tax_rules.block_original_repurchase =
            parse_var("BLOCK_ORIGINAL_REPURCHASE", tax_rules.block_original_repurchase)?;

        let mut harvesting = defaults.harvesting;
        harvesting.loss_threshold = parse_var("HARVEST_LOSS_THRESHOLD", harvesting.loss_threshold)?;
        harvesting.min_correlation =
            parse_var("SUBSTITUTE_MIN_CORRELATION", harvesting.min_correlation)?;

        let mut attribution = defaults.attribution;
        attribution.top_k = parse_var("ATTRIBUTION_TOP_K", attribution.top_k)?;

        let constraints = PortfolioConstraints {
            max_weight: parse_optional_var::<MaxWeight>("OPTIMIZER_MAX_WEIGHT")?,
            ..defaults.constraints
        };

        let config = Self {
            shrinkage: defaults.shrinkage,
            solver,
            solver_workers: parse_var("SOLVER_WORKERS", defaults.solver_workers)?.max(1),
            constraints,
            tax_rules,
            harvesting,
            attribution,
            attribution_lookback: parse_var(
                "ATTRIBUTION_LOOKBACK_PERIODS",
                defaults.attribution_lookback,
            )?
            .max(1),
            commentary_queue_capacity: parse_var(
                "COMMENTARY_QUEUE_CAPACITY",
                defaults.commentary_queue_capacity,
            )?
            .max(1),
        };

        tracing::info!(
            "Engine config: {} solve workers, wash-sale window {} days, loss threshold ${:.2}, max weight {:?}",
            config.solver_workers,
            config.tax_rules.wash_sale_window_days,
            config.harvesting.loss_threshold,
            config.constraints.max_weight
        );
        Ok(config)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_var<T>(key: &str, default: T) -> IndexingResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_optional_var<T>(key: &str) -> IndexingResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw).map(Some),
        _ => Ok(None),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> IndexingResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| IndexingError::InvalidInput(format!("{}={:?}: {}", key, raw, e)))
}
