//! Linear constraint family `l ≤ aᵀw ≤ u` over universe weights.

use index_core::{
    canonical_sector, BenchmarkWeights, ExclusionSet, IndexingError, IndexingResult, Universe,
};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What a constraint row expresses; used for presolve and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Full investment: `Σ w = 1`
    Budget,
    /// Per-instrument `0 ≤ w_i ≤ cap`
    Bounds,
    /// `w_i = 0`
    Exclusion,
    SectorBand,
    FactorNeutral,
    Custom,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintKind::Budget => write!(f, "Budget"),
            ConstraintKind::Bounds => write!(f, "Bounds"),
            ConstraintKind::Exclusion => write!(f, "Exclusion"),
            ConstraintKind::SectorBand => write!(f, "Sector Band"),
            ConstraintKind::FactorNeutral => write!(f, "Factor Neutral"),
            ConstraintKind::Custom => write!(f, "Custom"),
        }
    }
}

/// One row `lower ≤ Σ coefficient·w_index ≤ upper`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub kind: ConstraintKind,
    pub label: String,
    /// Sparse (universe index, coefficient) pairs
    pub coefficients: Vec<(usize, f64)>,
    pub lower: f64,
    pub upper: f64,
}

impl LinearConstraint {
    pub fn new(
        kind: ConstraintKind,
        label: impl Into<String>,
        coefficients: Vec<(usize, f64)>,
        lower: f64,
        upper: f64,
    ) -> IndexingResult<Self> {
        let label = label.into();
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(IndexingError::InvalidInput(format!(
                "constraint {} has bounds [{}, {}]",
                label, lower, upper
            )));
        }
        if lower == f64::INFINITY || upper == f64::NEG_INFINITY {
            return Err(IndexingError::InvalidInput(format!(
                "constraint {} has an unsatisfiable infinite bound",
                label
            )));
        }
        if coefficients.iter().any(|(_, c)| !c.is_finite()) {
            return Err(IndexingError::InvalidInput(format!(
                "constraint {} has a non-finite coefficient",
                label
            )));
        }
        Ok(Self {
            kind,
            label,
            coefficients,
            lower,
            upper,
        })
    }

    pub fn is_equality(&self) -> bool {
        self.lower == self.upper
    }

    /// Universe index this row pins to exactly zero, if it is such a row.
    pub fn pinned_to_zero(&self) -> Option<usize> {
        match self.coefficients.as_slice() {
            [(i, c)] if *c != 0.0 && self.lower == 0.0 && self.upper == 0.0 => Some(*i),
            _ => None,
        }
    }

    pub fn evaluate(&self, weights: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .map(|(i, c)| c * weights.get(*i).copied().unwrap_or(0.0))
            .sum()
    }

    /// Distance by which `weights` violate this row (0 when satisfied).
    pub fn violation(&self, weights: &[f64]) -> f64 {
        let value = self.evaluate(weights);
        (self.lower - value).max(value - self.upper).max(0.0)
    }
}

/// Per-sector exposure band on the summed sector weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorBand {
    pub sector: String,
    pub lower: f64,
    pub upper: f64,
}

impl SectorBand {
    /// Band of `± width` around the benchmark's weight in `sector`.
    pub fn around_benchmark(
        universe: &Universe,
        benchmark: &BenchmarkWeights,
        sector: &str,
        width: f64,
    ) -> Self {
        let target = canonical_sector(sector);
        let benchmark_weight: f64 = universe
            .instruments()
            .iter()
            .zip(benchmark.as_slice())
            .filter(|(i, _)| canonical_sector(&i.sector) == target)
            .map(|(_, w)| *w)
            .sum();
        Self {
            sector: sector.to_string(),
            lower: (benchmark_weight - width).max(0.0),
            upper: (benchmark_weight + width).min(1.0),
        }
    }
}

/// Keep portfolio exposure to a factor within `tolerance` of the benchmark's
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorNeutrality {
    pub name: String,
    /// Ticker -> exposure; missing tickers have zero exposure
    pub exposures: BTreeMap<String, f64>,
    pub tolerance: f64,
}

/// Single-name weight cap policy
///
/// Deserializes from a bare number (`0.05`) or from
/// `{"floor": 0.2, "multiple": 1.5}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxWeight {
    Fixed(f64),
    /// `max(floor, multiple / eligible instruments)`
    Dynamic { floor: f64, multiple: f64 },
}

impl MaxWeight {
    /// 20%, relaxed to 1.5x equal weight when fewer than 7.5 names remain
    /// eligible.
    pub const STANDARD_DYNAMIC: MaxWeight = MaxWeight::Dynamic {
        floor: 0.20,
        multiple: 1.5,
    };

    /// Cap for a universe with `eligible` non-excluded instruments.
    pub fn resolve(&self, eligible: usize) -> IndexingResult<f64> {
        let cap = match *self {
            MaxWeight::Fixed(cap) => cap,
            MaxWeight::Dynamic { floor, multiple } => {
                if !(floor > 0.0 && multiple > 0.0 && floor.is_finite() && multiple.is_finite()) {
                    return Err(IndexingError::InvalidInput(format!(
                        "dynamic max weight needs a positive floor and multiple, got {} and {}",
                        floor, multiple
                    )));
                }
                floor.max(multiple / eligible.max(1) as f64)
            }
        };
        if !(cap > 0.0 && cap.is_finite()) {
            return Err(IndexingError::InvalidInput(format!(
                "max weight must be positive, got {}",
                cap
            )));
        }
        Ok(cap)
    }
}

impl std::str::FromStr for MaxWeight {
    type Err = String;

    /// A number, or `dynamic` for [`MaxWeight::STANDARD_DYNAMIC`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("dynamic") {
            return Ok(MaxWeight::STANDARD_DYNAMIC);
        }
        s.trim()
            .parse::<f64>()
            .map(MaxWeight::Fixed)
            .map_err(|e| format!("expected a weight or \"dynamic\": {}", e))
    }
}

/// Request-level constraint options beyond budget, long-only and exclusions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConstraints {
    /// Single-name cap; uncapped when absent
    #[serde(default)]
    pub max_weight: Option<MaxWeight>,
    #[serde(default)]
    pub sector_bands: Vec<SectorBand>,
    #[serde(default)]
    pub factor_neutrality: Vec<FactorNeutrality>,
}

/// Constraint rows over a fixed-size universe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    dimension: usize,
    rows: Vec<LinearConstraint>,
}

/// Constraint rows restricted to the instruments left after presolve
#[derive(Debug, Clone)]
pub struct ReducedConstraints {
    /// Universe index of each reduced variable
    pub active: Vec<usize>,
    pub a: DMatrix<f64>,
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    pub labels: Vec<String>,
}

impl PortfolioConstraints {
    /// Resolved single-name cap for `eligible` non-excluded instruments.
    pub fn cap_for(&self, eligible: usize) -> IndexingResult<Option<f64>> {
        self.max_weight.map(|m| m.resolve(eligible)).transpose()
    }
}

impl ConstraintSet {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: Vec::new(),
        }
    }

    /// Standard tracking problem: budget, long-only with optional cap,
    /// exclusions, then the request's sector bands and factor rows.
    pub fn for_tracking(
        universe: &Universe,
        benchmark: &BenchmarkWeights,
        exclusions: &ExclusionSet,
        constraints: &PortfolioConstraints,
    ) -> IndexingResult<Self> {
        let n = universe.len();
        let mut set = Self::new(n);

        set.push(LinearConstraint::new(
            ConstraintKind::Budget,
            "budget",
            (0..n).map(|i| (i, 1.0)).collect(),
            1.0,
            1.0,
        )?)?;

        let excluded: BTreeSet<usize> = exclusions.excluded_indices(universe).into_iter().collect();
        let cap = constraints
            .cap_for(n - excluded.len())?
            .unwrap_or(f64::INFINITY);
        for (i, instrument) in universe.instruments().iter().enumerate() {
            if excluded.contains(&i) {
                set.push(LinearConstraint::new(
                    ConstraintKind::Exclusion,
                    format!("exclude:{}", instrument.ticker),
                    vec![(i, 1.0)],
                    0.0,
                    0.0,
                )?)?;
            } else {
                set.push(LinearConstraint::new(
                    ConstraintKind::Bounds,
                    format!("bounds:{}", instrument.ticker),
                    vec![(i, 1.0)],
                    0.0,
                    cap,
                )?)?;
            }
        }

        for band in &constraints.sector_bands {
            let target = canonical_sector(&band.sector);
            let members: Vec<(usize, f64)> = universe
                .instruments()
                .iter()
                .enumerate()
                .filter(|(_, i)| canonical_sector(&i.sector) == target)
                .map(|(idx, _)| (idx, 1.0))
                .collect();
            if members.is_empty() {
                return Err(IndexingError::InvalidInput(format!(
                    "sector band for {} matches no instrument",
                    band.sector
                )));
            }
            set.push(LinearConstraint::new(
                ConstraintKind::SectorBand,
                format!("sector:{}", band.sector),
                members,
                band.lower,
                band.upper,
            )?)?;
        }

        for factor in &constraints.factor_neutrality {
            if !(factor.tolerance >= 0.0) {
                return Err(IndexingError::InvalidInput(format!(
                    "factor {} has a negative tolerance",
                    factor.name
                )));
            }
            if let Some(unknown) = factor.exposures.keys().find(|t| universe.index_of(t).is_none()) {
                return Err(IndexingError::InvalidInput(format!(
                    "factor {} has an exposure for unknown ticker {}",
                    factor.name, unknown
                )));
            }
            let coefficients: Vec<(usize, f64)> = universe
                .tickers()
                .enumerate()
                .filter_map(|(i, t)| factor.exposures.get(t).map(|e| (i, *e)))
                .collect();
            let target: f64 = coefficients
                .iter()
                .map(|(i, e)| e * benchmark.as_slice()[*i])
                .sum();
            set.push(LinearConstraint::new(
                ConstraintKind::FactorNeutral,
                format!("factor:{}", factor.name),
                coefficients,
                target - factor.tolerance,
                target + factor.tolerance,
            )?)?;
        }

        Ok(set)
    }

    pub fn push(&mut self, row: LinearConstraint) -> IndexingResult<()> {
        if let Some((i, _)) = row.coefficients.iter().find(|(i, _)| *i >= self.dimension) {
            return Err(IndexingError::InvalidInput(format!(
                "constraint {} references index {} outside a universe of {}",
                row.label, i, self.dimension
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn rows(&self) -> &[LinearConstraint] {
        &self.rows
    }

    pub fn count(&self, kind: ConstraintKind) -> usize {
        self.rows.iter().filter(|r| r.kind == kind).count()
    }

    /// Universe indices pinned to zero by single-variable equality rows.
    pub fn pinned_to_zero(&self) -> BTreeSet<usize> {
        self.rows.iter().filter_map(|r| r.pinned_to_zero()).collect()
    }

    /// Largest violation over all rows and the label of the worst row.
    pub fn max_violation(&self, weights: &[f64]) -> (f64, Option<&str>) {
        self.rows
            .iter()
            .map(|r| (r.violation(weights), r.label.as_str()))
            .fold((0.0, None), |(best, label), (v, l)| {
                if v > best {
                    (v, Some(l))
                } else {
                    (best, label)
                }
            })
    }

    /// Drop pinned variables and their rows. Rows left with no variables must
    /// already be satisfied by the all-zero point.
    pub fn reduce(&self, pinned: &BTreeSet<usize>) -> IndexingResult<ReducedConstraints> {
        let active: Vec<usize> = (0..self.dimension).filter(|i| !pinned.contains(i)).collect();
        let mut position = vec![None; self.dimension];
        for (k, &i) in active.iter().enumerate() {
            position[i] = Some(k);
        }

        let mut kept: Vec<(Vec<(usize, f64)>, f64, f64, String)> = Vec::new();
        for row in &self.rows {
            if row.pinned_to_zero().is_some() {
                continue;
            }
            let coefficients: Vec<(usize, f64)> = row
                .coefficients
                .iter()
                .filter(|(_, c)| *c != 0.0)
                .filter_map(|(i, c)| position[*i].map(|k| (k, *c)))
                .collect();
            if coefficients.is_empty() {
                if row.lower > 0.0 || row.upper < 0.0 {
                    return Err(IndexingError::InfeasibleConstraints(format!(
                        "constraint {} requires [{}, {}] but every instrument it covers is excluded",
                        row.label, row.lower, row.upper
                    )));
                }
                continue;
            }
            kept.push((coefficients, row.lower, row.upper, row.label.clone()));
        }

        let m = kept.len();
        let mut a = DMatrix::zeros(m, active.len());
        for (r, (coefficients, _, _, _)) in kept.iter().enumerate() {
            for (k, c) in coefficients {
                a[(r, *k)] += c;
            }
        }

        Ok(ReducedConstraints {
            active,
            a,
            lower: DVector::from_iterator(m, kept.iter().map(|row| row.1)),
            upper: DVector::from_iterator(m, kept.iter().map(|row| row.2)),
            labels: kept.into_iter().map(|row| row.3).collect(),
        })
    }
}
