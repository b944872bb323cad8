use crate::constraints::{ConstraintSet, PortfolioConstraints};
use crate::qp::{QpProblem, QpSolver, SolverSettings};
use crate::result::{OptimizationResult, SolverDiagnostics, SolverStatus};
use index_core::{
    BenchmarkWeights, ExclusionSet, IndexingError, IndexingResult, Universe,
    NEGATIVE_WEIGHT_TOLERANCE, WEIGHT_SUM_TOLERANCE,
};
use nalgebra::{DMatrix, DVector};
use risk_model::CovarianceMatrix;

/// Bound tolerance on constraint rows, relative to `max(1, |bound|)`.
const ROW_TOLERANCE: f64 = 1e-6;

/// Minimizes `(w - w_b)ᵀ Σ (w - w_b)` subject to a [`ConstraintSet`].
///
/// Stateless between calls; every input is borrowed for the duration of
/// one solve and the result is an owned value.
#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer {
    solver: QpSolver,
}

impl PortfolioOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: SolverSettings) -> Self {
        Self {
            solver: QpSolver::new(settings),
        }
    }

    pub fn settings(&self) -> &SolverSettings {
        self.solver.settings()
    }

    /// Budget, long-only and exclusions only.
    pub fn optimize(
        &self,
        universe: &Universe,
        covariance: &CovarianceMatrix,
        benchmark: &BenchmarkWeights,
        exclusions: &ExclusionSet,
    ) -> IndexingResult<OptimizationResult> {
        self.optimize_with(
            universe,
            covariance,
            benchmark,
            exclusions,
            &PortfolioConstraints::default(),
        )
    }

    pub fn optimize_with(
        &self,
        universe: &Universe,
        covariance: &CovarianceMatrix,
        benchmark: &BenchmarkWeights,
        exclusions: &ExclusionSet,
        constraints: &PortfolioConstraints,
    ) -> IndexingResult<OptimizationResult> {
        for unmatched in exclusions.unmatched(universe) {
            tracing::warn!("Exclusion {} matches no instrument in the universe", unmatched);
        }
        let set = ConstraintSet::for_tracking(universe, benchmark, exclusions, constraints)?;

        let pinned = set.pinned_to_zero();
        if pinned.len() == universe.len() {
            return Err(IndexingError::InfeasibleConstraints(format!(
                "all {} instruments are excluded ({})",
                universe.len(),
                exclusions.describe()
            )));
        }
        let active = universe.len() - pinned.len();
        if let Some(cap) = constraints.cap_for(active)? {
            if cap * (active as f64) < 1.0 - WEIGHT_SUM_TOLERANCE {
                return Err(IndexingError::InfeasibleConstraints(format!(
                    "max weight {:.4} across {} eligible instruments cannot reach full investment",
                    cap, active
                )));
            }
        }

        self.optimize_set(universe, covariance, benchmark, &set)
    }

    /// Solve against an arbitrary constraint set over the universe.
    pub fn optimize_set(
        &self,
        universe: &Universe,
        covariance: &CovarianceMatrix,
        benchmark: &BenchmarkWeights,
        set: &ConstraintSet,
    ) -> IndexingResult<OptimizationResult> {
        check_inputs(universe, covariance, benchmark, set)?;
        let n = universe.len();

        let pinned = set.pinned_to_zero();
        if pinned.len() == n {
            return Err(IndexingError::InfeasibleConstraints(
                "every instrument is pinned to zero weight".to_string(),
            ));
        }
        let reduced = set.reduce(&pinned)?;
        let active = &reduced.active;

        tracing::info!(
            "Optimizing {} instruments ({} excluded, {} constraint rows)",
            active.len(),
            pinned.len(),
            reduced.a.nrows()
        );

        let (active_weights, status, mut diagnostics) = if active.len() == 1 {
            let diagnostics = SolverDiagnostics {
                iterations: 0,
                primal_residual: 0.0,
                dual_residual: 0.0,
                duality_gap: 0.0,
                max_violation: 0.0,
                active_instruments: 1,
                constraint_rows: reduced.a.nrows(),
            };
            (vec![1.0], SolverStatus::Trivial, diagnostics)
        } else {
            // Objective over active weights x with w_excluded = 0:
            // (x - w_b,a)ᵀ Σ_aa (x - w_b,a) - 2 xᵀ Σ_a,e w_b,e + const
            //   = ½ xᵀ (2Σ_aa) x - 2 (Σ w_b)_aᵀ x + const
            // scaled by the mean active variance so gap tolerances are unitless.
            let sigma = covariance.matrix();
            let b = DVector::from_column_slice(benchmark.as_slice());
            let sigma_b = sigma * &b;
            let scale = active.iter().map(|&i| sigma[(i, i)]).sum::<f64>() / active.len() as f64;
            if !(scale > 0.0 && scale.is_finite()) {
                return Err(IndexingError::InvalidInput(format!(
                    "mean active variance is {}",
                    scale
                )));
            }
            let p = DMatrix::from_fn(active.len(), active.len(), |r, c| {
                2.0 * sigma[(active[r], active[c])] / scale
            });
            let q = DVector::from_fn(active.len(), |r, _| -2.0 * sigma_b[active[r]] / scale);

            let problem = QpProblem::new(
                p,
                q,
                reduced.a.clone(),
                reduced.lower.clone(),
                reduced.upper.clone(),
            )?;
            let solution = self.solver.solve(&problem)?;

            let diagnostics = SolverDiagnostics {
                iterations: solution.iterations,
                primal_residual: solution.primal_residual,
                dual_residual: solution.dual_residual,
                duality_gap: solution.duality_gap,
                max_violation: 0.0,
                active_instruments: active.len(),
                constraint_rows: reduced.a.nrows(),
            };
            (solution.x.iter().copied().collect::<Vec<f64>>(), SolverStatus::Optimal, diagnostics)
        };

        let mut weights = vec![0.0; n];
        for (k, &i) in active.iter().enumerate() {
            weights[i] = active_weights[k];
        }
        let max_violation = verify(set, &weights).map_err(|e| match e {
            IndexingError::SolverDivergence { reason, .. } => IndexingError::SolverDivergence {
                iterations: diagnostics.iterations,
                primal_residual: diagnostics.primal_residual,
                dual_residual: diagnostics.dual_residual,
                reason,
            },
            other => other,
        })?;
        diagnostics.max_violation = max_violation;

        let active_vs_benchmark: Vec<f64> = weights
            .iter()
            .zip(benchmark.as_slice())
            .map(|(w, b)| w - b)
            .collect();
        let tracking_error_variance = covariance.quad_form(&active_vs_benchmark).max(0.0);
        let tracking_error = tracking_error_variance.sqrt();

        let excluded: Vec<String> = pinned
            .iter()
            .filter_map(|i| universe.get(*i).map(|inst| inst.ticker.clone()))
            .collect();

        tracing::info!(
            "Optimization finished: status={:?}, iterations={}, tracking error={:.6} ({:.4} annualized)",
            status,
            diagnostics.iterations,
            tracking_error,
            tracking_error * index_core::PERIODS_PER_YEAR.sqrt()
        );

        Ok(OptimizationResult {
            tickers: universe.tickers().map(str::to_string).collect(),
            weights,
            excluded,
            tracking_error_variance,
            tracking_error,
            status,
            diagnostics,
        })
    }
}

fn check_inputs(
    universe: &Universe,
    covariance: &CovarianceMatrix,
    benchmark: &BenchmarkWeights,
    set: &ConstraintSet,
) -> IndexingResult<()> {
    benchmark.ensure_matches(universe)?;
    if covariance.dim() != universe.len() {
        return Err(IndexingError::InvalidInput(format!(
            "covariance covers {} instruments, universe has {}",
            covariance.dim(),
            universe.len()
        )));
    }
    if let Some((expected, got)) = universe
        .tickers()
        .zip(covariance.tickers())
        .find(|(u, c)| *u != c.as_str())
    {
        return Err(IndexingError::InvalidInput(format!(
            "covariance is ordered differently from the universe ({} vs {})",
            got, expected
        )));
    }
    if set.dimension() != universe.len() {
        return Err(IndexingError::InvalidInput(format!(
            "constraint set covers {} instruments, universe has {}",
            set.dimension(),
            universe.len()
        )));
    }
    Ok(())
}

/// Post-solve invariants on the raw solver output: full investment, no
/// shorts, every row satisfied. Nothing is rescaled or clamped.
fn verify(set: &ConstraintSet, weights: &[f64]) -> IndexingResult<f64> {
    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(IndexingError::invariant_violation(format!(
            "weights sum to {:.9}",
            total
        )));
    }
    if let Some(min) = weights.iter().copied().reduce(f64::min) {
        if min < -NEGATIVE_WEIGHT_TOLERANCE {
            return Err(IndexingError::invariant_violation(format!(
                "negative weight {:.3e}",
                min
            )));
        }
    }

    let mut worst = 0.0_f64;
    for row in set.rows() {
        let violation = row.violation(weights);
        let scale = 1.0_f64.max(row.lower.abs().min(row.upper.abs()));
        if violation > ROW_TOLERANCE * scale {
            return Err(IndexingError::invariant_violation(format!(
                "constraint {} violated by {:.3e}",
                row.label, violation
            )));
        }
        worst = worst.max(violation);
    }
    Ok(worst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::PortfolioConstraints;
    use index_core::Instrument;

    fn tracking_set() -> ConstraintSet {
        let universe = Universe::new(vec![
            Instrument::new("A", "Tech"),
            Instrument::new("B", "Tech"),
            Instrument::new("C", "Energy"),
            Instrument::new("D", "Energy"),
        ])
        .unwrap();
        ConstraintSet::for_tracking(
            &universe,
            &BenchmarkWeights::new(vec![0.4, 0.3, 0.2, 0.1]).unwrap(),
            &ExclusionSet::new().with_ticker("A"),
            &PortfolioConstraints::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_accepts_feasible_weights() {
        let worst = verify(&tracking_set(), &[0.0, 0.7, 0.2, 0.1]).unwrap();
        assert!(worst < 1e-12);
    }

    #[test]
    fn test_verify_rejects_short_budget_instead_of_rescaling() {
        // Loosely converged output summing to ~0.873
        let weights = [0.0, 0.6162, 0.1763, 0.0804];
        match verify(&tracking_set(), &weights) {
            Err(IndexingError::SolverDivergence { reason, .. }) => {
                assert!(reason.contains("sum"), "{}", reason);
            }
            other => panic!("expected divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_rejects_negative_weight() {
        let weights = [0.0, 0.8, 0.3, -0.1];
        assert!(matches!(
            verify(&tracking_set(), &weights),
            Err(IndexingError::SolverDivergence { .. })
        ));
    }
}
