//! Validated covariance matrices.

use index_core::{IndexingError, IndexingResult, PERIODS_PER_YEAR};
use nalgebra::{Cholesky, DMatrix, DVector};
use serde::Serialize;

/// Relative tolerance for the symmetry check.
const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// Symmetric, strictly positive-definite N×N covariance over one universe.
///
/// Construction goes through [`CovarianceMatrix::new`], which runs a Cholesky
/// factorization, so holding a value is proof of positive definiteness.
#[derive(Debug, Clone, Serialize)]
pub struct CovarianceMatrix {
    tickers: Vec<String>,
    matrix: DMatrix<f64>,
}

impl CovarianceMatrix {
    pub fn new(tickers: Vec<String>, matrix: DMatrix<f64>) -> IndexingResult<Self> {
        let n = tickers.len();
        if matrix.nrows() != n || matrix.ncols() != n {
            return Err(IndexingError::InvalidInput(format!(
                "covariance is {}x{} but {} tickers were given",
                matrix.nrows(),
                matrix.ncols(),
                n
            )));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(IndexingError::InvalidInput(
                "covariance contains non-finite entries".to_string(),
            ));
        }

        let scale = matrix.amax().max(f64::MIN_POSITIVE);
        for i in 0..n {
            for j in (i + 1)..n {
                if (matrix[(i, j)] - matrix[(j, i)]).abs() > SYMMETRY_TOLERANCE * scale {
                    return Err(IndexingError::InvalidInput(format!(
                        "covariance is not symmetric at ({}, {})",
                        tickers[i], tickers[j]
                    )));
                }
            }
        }

        // Exact symmetry so downstream quadratic forms do not drift.
        let matrix = (&matrix + matrix.transpose()) * 0.5;

        if Cholesky::new(matrix.clone()).is_none() {
            return Err(IndexingError::InsufficientData(
                "covariance is not positive definite".to_string(),
            ));
        }

        Ok(Self { tickers, matrix })
    }

    pub fn dim(&self) -> usize {
        self.tickers.len()
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix[(i, j)]
    }

    pub fn variance(&self, i: usize) -> f64 {
        self.matrix[(i, i)]
    }

    pub fn volatility(&self, i: usize) -> f64 {
        self.variance(i).sqrt()
    }

    pub fn annualized_volatility(&self, i: usize) -> f64 {
        self.volatility(i) * PERIODS_PER_YEAR.sqrt()
    }

    /// `xᵀ Σ x`
    pub fn quad_form(&self, x: &[f64]) -> f64 {
        let v = DVector::from_column_slice(x);
        (v.transpose() * &self.matrix * &v)[(0, 0)]
    }

    /// `Σ x`
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let v = DVector::from_column_slice(x);
        (&self.matrix * v).iter().copied().collect()
    }

    /// Eigenvalues in ascending order. O(N³); intended for diagnostics and tests.
    pub fn eigenvalues(&self) -> Vec<f64> {
        let eigen = self.matrix.clone().symmetric_eigen();
        let mut values: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values
    }

    /// Ratio of largest to smallest eigenvalue.
    pub fn condition_number(&self) -> f64 {
        let values = self.eigenvalues();
        match (values.first(), values.last()) {
            (Some(min), Some(max)) if *min > 0.0 => max / min,
            _ => f64::INFINITY,
        }
    }

    pub fn correlation(&self) -> DMatrix<f64> {
        correlation_from_covariance(&self.matrix)
    }
}

/// Convert a covariance matrix to a correlation matrix.
///
/// Rows/columns with zero variance get zero off-diagonal correlation.
pub fn correlation_from_covariance(cov: &DMatrix<f64>) -> DMatrix<f64> {
    let n = cov.nrows();
    let std: Vec<f64> = (0..n).map(|i| cov[(i, i)].max(0.0).sqrt()).collect();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            1.0
        } else if std[i] > 0.0 && std[j] > 0.0 {
            (cov[(i, j)] / (std[i] * std[j])).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    })
}
