use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexingError {
    /// The risk model cannot produce a covariance estimate.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The constraint set admits no portfolio at all (e.g. every instrument excluded).
    #[error("Infeasible constraints: {0}")]
    InfeasibleConstraints(String),

    /// The solver did not reach the KKT tolerance, or its output failed a
    /// post-solve invariant check.
    #[error(
        "Solver divergence after {iterations} iterations (primal residual {primal_residual:.3e}, dual residual {dual_residual:.3e}): {reason}"
    )]
    SolverDivergence {
        iterations: usize,
        primal_residual: f64,
        dual_residual: f64,
        reason: String,
    },

    /// Attribution inputs do not cover the optimizer's universe.
    #[error("Data mismatch: {0}")]
    DataMismatch(String),
}

impl IndexingError {
    /// Build a divergence error for an invariant violation detected outside the iteration loop.
    pub fn invariant_violation(reason: impl Into<String>) -> Self {
        IndexingError::SolverDivergence {
            iterations: 0,
            primal_residual: f64::NAN,
            dual_residual: f64::NAN,
            reason: reason.into(),
        }
    }

    /// Whether this error aborts the whole request rather than one portion of it.
    ///
    /// Risk-model, optimizer and input-validation failures abort; attribution
    /// coverage gaps only drop the attribution section.
    pub fn aborts_request(&self) -> bool {
        !matches!(self, IndexingError::DataMismatch(_))
    }

    /// Short machine-readable kind, used in logs and serialized responses.
    pub fn kind(&self) -> &'static str {
        match self {
            IndexingError::InsufficientData(_) => "insufficient_data",
            IndexingError::InvalidInput(_) => "invalid_input",
            IndexingError::InfeasibleConstraints(_) => "infeasible_constraints",
            IndexingError::SolverDivergence { .. } => "solver_divergence",
            IndexingError::DataMismatch(_) => "data_mismatch",
        }
    }
}

pub type IndexingResult<T> = Result<T, IndexingError>;
