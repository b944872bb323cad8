//! Convex QP `min ½xᵀPx + qᵀx  s.t.  l ≤ Ax ≤ u`, solved with Clarabel's
//! interior-point method.
//!
//! Two-sided rows are split into conic form: equality rows go into a zero
//! cone, finite upper bounds become `aᵀx ≤ u` and finite lower bounds
//! `-aᵀx ≤ -l` in a nonnegative cone.

use clarabel::algebra::CscMatrix;
use index_core::{IndexingError, IndexingResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub max_iterations: usize,
    /// Absolute duality-gap tolerance
    pub eps_abs: f64,
    /// Relative duality-gap tolerance
    pub eps_rel: f64,
    /// Primal and dual feasibility tolerance
    pub eps_feasibility: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            eps_abs: 1e-9,
            eps_rel: 1e-9,
            eps_feasibility: 1e-9,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> IndexingResult<()> {
        for (name, v) in [
            ("eps_abs", self.eps_abs),
            ("eps_rel", self.eps_rel),
            ("eps_feasibility", self.eps_feasibility),
        ] {
            if !(v > 0.0 && v.is_finite()) {
                return Err(IndexingError::InvalidInput(format!(
                    "solver {} must be positive, got {}",
                    name, v
                )));
            }
        }
        if self.max_iterations == 0 {
            return Err(IndexingError::InvalidInput(
                "solver iteration limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// `min ½xᵀPx + qᵀx  s.t.  l ≤ Ax ≤ u`
#[derive(Debug, Clone)]
pub struct QpProblem {
    pub p: DMatrix<f64>,
    pub q: DVector<f64>,
    pub a: DMatrix<f64>,
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

impl QpProblem {
    pub fn new(
        p: DMatrix<f64>,
        q: DVector<f64>,
        a: DMatrix<f64>,
        lower: DVector<f64>,
        upper: DVector<f64>,
    ) -> IndexingResult<Self> {
        let n = q.len();
        let m = a.nrows();
        if p.nrows() != n || p.ncols() != n {
            return Err(IndexingError::InvalidInput(format!(
                "P is {}x{} for {} variables",
                p.nrows(),
                p.ncols(),
                n
            )));
        }
        if a.ncols() != n || lower.len() != m || upper.len() != m {
            return Err(IndexingError::InvalidInput(format!(
                "A is {}x{} with {} lower and {} upper bounds for {} variables",
                m,
                a.ncols(),
                lower.len(),
                upper.len(),
                n
            )));
        }
        if let Some(r) = (0..m).find(|&r| !(lower[r] <= upper[r])) {
            return Err(IndexingError::InvalidInput(format!(
                "row {} has bounds [{}, {}]",
                r, lower[r], upper[r]
            )));
        }
        Ok(Self {
            p,
            q,
            a,
            lower,
            upper,
        })
    }

    pub fn variables(&self) -> usize {
        self.q.len()
    }

    pub fn constraints(&self) -> usize {
        self.a.nrows()
    }

    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        0.5 * (x.transpose() * &self.p * x)[(0, 0)] + self.q.dot(x)
    }

    /// Upper triangle of P in compressed-column form.
    fn p_upper(&self) -> CscMatrix<f64> {
        let n = self.variables();
        let mut colptr = vec![0];
        let mut rowval = Vec::new();
        let mut nzval = Vec::new();
        for j in 0..n {
            for i in 0..=j {
                let v = 0.5 * (self.p[(i, j)] + self.p[(j, i)]);
                if v != 0.0 {
                    rowval.push(i);
                    nzval.push(v);
                }
            }
            colptr.push(nzval.len());
        }
        CscMatrix::new(n, n, colptr, rowval, nzval)
    }

    /// Conic rows `Ax + s = b`: zero-cone rows first, then nonnegative ones.
    fn conic_rows(&self) -> ConicRows {
        let mut equalities = Vec::new();
        let mut inequalities = Vec::new();
        for r in 0..self.constraints() {
            let (l, u) = (self.lower[r], self.upper[r]);
            if l == u {
                equalities.push((r, 1.0, u));
                continue;
            }
            if u.is_finite() {
                inequalities.push((r, 1.0, u));
            }
            if l.is_finite() {
                inequalities.push((r, -1.0, -l));
            }
        }

        let zero = equalities.len();
        let nonnegative = inequalities.len();
        let rows: Vec<(usize, f64, f64)> = equalities.into_iter().chain(inequalities).collect();

        let n = self.variables();
        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for (k, (r, sign, _)) in rows.iter().enumerate() {
            for (j, column) in columns.iter_mut().enumerate() {
                let v = self.a[(*r, j)];
                if v != 0.0 {
                    column.push((k, sign * v));
                }
            }
        }
        let mut colptr = vec![0];
        let mut rowval = Vec::new();
        let mut nzval = Vec::new();
        for column in columns {
            for (k, v) in column {
                rowval.push(k);
                nzval.push(v);
            }
            colptr.push(nzval.len());
        }

        ConicRows {
            a: CscMatrix::new(rows.len(), n, colptr, rowval, nzval),
            b: rows.iter().map(|(_, _, b)| *b).collect(),
            zero,
            nonnegative,
        }
    }
}

struct ConicRows {
    a: CscMatrix<f64>,
    b: Vec<f64>,
    zero: usize,
    nonnegative: usize,
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: DVector<f64>,
    pub iterations: usize,
    pub primal_residual: f64,
    pub dual_residual: f64,
    pub objective: f64,
    /// `|primal objective - dual objective|`
    pub duality_gap: f64,
}

/// Thin wrapper over Clarabel's default solver.
#[derive(Debug, Clone, Default)]
pub struct QpSolver {
    settings: SolverSettings,
}

impl QpSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn solve(&self, problem: &QpProblem) -> IndexingResult<QpSolution> {
        use clarabel::solver::*;

        self.settings.validate()?;
        let p = problem.p_upper();
        let q: Vec<f64> = problem.q.iter().copied().collect();
        let rows = problem.conic_rows();

        let mut cones = Vec::with_capacity(2);
        if rows.zero > 0 {
            cones.push(ZeroConeT(rows.zero));
        }
        if rows.nonnegative > 0 {
            cones.push(NonnegativeConeT(rows.nonnegative));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(u32::try_from(self.settings.max_iterations).unwrap_or(u32::MAX))
            .tol_gap_abs(self.settings.eps_abs)
            .tol_gap_rel(self.settings.eps_rel)
            .tol_feas(self.settings.eps_feasibility)
            .verbose(false)
            .build()
            .map_err(|e| {
                IndexingError::InvalidInput(format!("failed to build solver settings: {}", e))
            })?;

        let mut solver = DefaultSolver::new(&p, &q, &rows.a, &rows.b, &cones, settings)
            .map_err(|e| IndexingError::InvalidInput(format!("failed to set up solver: {:?}", e)))?;
        solver.solve();

        let solution = &solver.solution;
        let iterations = solution.iterations as usize;
        tracing::debug!(
            "QP finished: {:?} after {} iterations (primal {:.3e}, dual {:.3e}, {:.1} ms)",
            solution.status,
            iterations,
            solution.r_prim,
            solution.r_dual,
            solution.solve_time * 1e3
        );

        if !matches!(solution.status, SolverStatus::Solved) {
            return Err(IndexingError::SolverDivergence {
                iterations,
                primal_residual: solution.r_prim,
                dual_residual: solution.r_dual,
                reason: format!("solver stopped with status {:?}", solution.status),
            });
        }

        Ok(QpSolution {
            x: DVector::from_column_slice(&solution.x),
            iterations,
            primal_residual: solution.r_prim,
            dual_residual: solution.r_dual,
            objective: solution.obj_val,
            duality_gap: (solution.obj_val - solution.obj_val_dual).abs(),
        })
    }
}
