//! Portfolio Optimizer
//!
//! Tracking-error minimization against a benchmark under a family of linear
//! constraints (budget, long-only, exclusions, single-name caps, sector bands,
//! factor neutrality), solved as a convex QP with Clarabel.

pub mod constraints;
pub mod optimizer;
pub mod qp;
pub mod result;

pub use constraints::{
    ConstraintKind, ConstraintSet, FactorNeutrality, LinearConstraint, MaxWeight,
    PortfolioConstraints, SectorBand,
};
pub use optimizer::PortfolioOptimizer;
pub use qp::{QpProblem, QpSolution, QpSolver, SolverSettings};
pub use result::{Holding, OptimizationResult, SolverDiagnostics, SolverStatus};
