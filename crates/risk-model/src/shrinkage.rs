//! Ledoit-Wolf Shrinkage
//!
//! Blends the sample covariance `S` with a constant-correlation target `F`:
//! `Σ = δF + (1 − δ)S`. The target keeps every instrument's own variance and
//! replaces each pairwise correlation with the panel's average correlation, so
//! variance heterogeneity survives shrinkage. `δ` is the method-of-moments
//! estimate of the intensity that minimizes expected Frobenius loss
//! (Ledoit & Wolf, "Honey, I Shrunk the Sample Covariance Matrix", 2004).

use crate::covariance::CovarianceMatrix;
use crate::returns::ReturnMatrix;
use index_core::{IndexingError, IndexingResult};
use nalgebra::{Cholesky, DMatrix};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Shrinkage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShrinkageSettings {
    /// Use this intensity instead of the estimated one (clipped to [0, 1])
    pub fixed_intensity: Option<f64>,
    /// Intensity applied when the estimated blend fails the positive-definite check
    pub rank_deficient_floor: f64,
    /// Variances at or below `max_variance × this` are treated as degenerate
    pub degenerate_variance_ratio: f64,
}

impl Default for ShrinkageSettings {
    fn default() -> Self {
        Self {
            fixed_intensity: None,
            rank_deficient_floor: 1e-3,
            degenerate_variance_ratio: 1e-12,
        }
    }
}

/// Output of one shrinkage run
#[derive(Debug, Clone, Serialize)]
pub struct ShrinkageEstimate {
    pub covariance: CovarianceMatrix,
    /// Shrinkage intensity δ in [0, 1]
    pub intensity: f64,
    /// Intensity before clipping, `κ̂ / T`
    pub raw_intensity: f64,
    /// Average pairwise sample correlation used by the target
    pub average_correlation: f64,
    pub observations: usize,
    pub instruments: usize,
}

/// Sample moments shared by the target and the intensity estimate.
struct SampleMoments {
    /// Centered returns, T×N
    centered: DMatrix<f64>,
    /// Sample covariance with 1/T normalization
    sample: DMatrix<f64>,
    std: Vec<f64>,
    average_correlation: f64,
}

/// Ledoit-Wolf estimator with a constant-correlation target
#[derive(Debug, Clone, Default)]
pub struct LedoitWolf {
    settings: ShrinkageSettings,
}

impl LedoitWolf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ShrinkageSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ShrinkageSettings {
        &self.settings
    }

    /// Shrink the covariance of a T×N return panel.
    pub fn shrink(&self, returns: &ReturnMatrix) -> IndexingResult<ShrinkageEstimate> {
        let t = returns.observations();
        let n = returns.instruments();

        if t < 2 {
            return Err(IndexingError::InsufficientData(format!(
                "need at least 2 observations, got {}",
                t
            )));
        }

        info!(
            observations = t,
            instruments = n,
            "Computing Ledoit-Wolf shrinkage covariance"
        );

        let moments = self.sample_moments(returns)?;
        let target = constant_correlation_target(&moments);

        if n > 1 && !target_is_positive_definite(moments.average_correlation, n) {
            return Err(IndexingError::InsufficientData(format!(
                "average correlation {:.6} makes the constant-correlation target singular",
                moments.average_correlation
            )));
        }

        let raw_intensity = match self.settings.fixed_intensity {
            Some(fixed) => fixed,
            None => optimal_intensity(&moments, &target),
        };
        let mut intensity = if raw_intensity.is_finite() {
            raw_intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut blended = blend(&target, &moments.sample, intensity);
        if Cholesky::new(blended.clone()).is_none() {
            if intensity >= self.settings.rank_deficient_floor {
                return Err(IndexingError::InsufficientData(format!(
                    "shrunk covariance is not positive definite at intensity {:.6}",
                    intensity
                )));
            }
            warn!(
                intensity,
                floor = self.settings.rank_deficient_floor,
                "Blended covariance is singular, raising shrinkage intensity"
            );
            intensity = self.settings.rank_deficient_floor;
            blended = blend(&target, &moments.sample, intensity);
        }

        let covariance = CovarianceMatrix::new(returns.tickers().to_vec(), blended)?;

        info!(
            intensity,
            raw_intensity,
            average_correlation = moments.average_correlation,
            "Covariance shrinkage complete"
        );

        Ok(ShrinkageEstimate {
            covariance,
            intensity,
            raw_intensity,
            average_correlation: moments.average_correlation,
            observations: t,
            instruments: n,
        })
    }

    fn sample_moments(&self, returns: &ReturnMatrix) -> IndexingResult<SampleMoments> {
        let t = returns.observations() as f64;
        let n = returns.instruments();
        let centered = returns.centered();
        let sample = (centered.transpose() * &centered) / t;

        // Flat or near-flat columns make the correlation target undefined.
        let stats = returns.column_stats();
        let max_variance = stats
            .iter()
            .map(|s| s.std_dev * s.std_dev)
            .fold(0.0_f64, f64::max);
        let cutoff = max_variance * self.settings.degenerate_variance_ratio;
        if let Some((i, flat)) = stats
            .iter()
            .enumerate()
            .find(|(_, s)| s.max == s.min || s.std_dev * s.std_dev <= cutoff)
        {
            return Err(IndexingError::InsufficientData(format!(
                "{} has a zero-variance return series (range [{:.3e}, {:.3e}])",
                returns.tickers()[i],
                flat.min,
                flat.max
            )));
        }

        let std: Vec<f64> = (0..n).map(|i| sample[(i, i)].sqrt()).collect();

        let average_correlation = if n > 1 {
            let mut sum = 0.0;
            for i in 0..n {
                for j in (i + 1)..n {
                    sum += sample[(i, j)] / (std[i] * std[j]);
                }
            }
            2.0 * sum / ((n * (n - 1)) as f64)
        } else {
            0.0
        };

        debug!(max_variance, average_correlation, "Sample moments computed");

        Ok(SampleMoments {
            centered,
            sample,
            std,
            average_correlation,
        })
    }
}

/// `F_ii = s_ii`, `F_ij = r̄ √(s_ii s_jj)`
fn constant_correlation_target(moments: &SampleMoments) -> DMatrix<f64> {
    let n = moments.std.len();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            moments.sample[(i, i)]
        } else {
            moments.average_correlation * moments.std[i] * moments.std[j]
        }
    })
}

/// The constant-correlation matrix with unit diagonal is PD iff `−1/(N−1) < r̄ < 1`;
/// scaling by the (positive) standard deviations preserves that.
fn target_is_positive_definite(average_correlation: f64, n: usize) -> bool {
    let lower = -1.0 / (n as f64 - 1.0);
    average_correlation > lower + 1e-12 && average_correlation < 1.0 - 1e-12
}

fn blend(target: &DMatrix<f64>, sample: &DMatrix<f64>, intensity: f64) -> DMatrix<f64> {
    target * intensity + sample * (1.0 - intensity)
}

/// `δ* = κ̂ / T` with `κ̂ = (π̂ − ρ̂) / γ̂`.
///
/// With `y` the centered returns and `S = yᵀy / T`:
/// - `π_ij = (1/T) Σ_t (y_ti y_tj − s_ij)² = [(y∘y)ᵀ(y∘y)]_ij / T − s_ij²`
/// - `θ_ij = (1/T) Σ_t (y_ti² − s_ii)(y_ti y_tj − s_ij) = [(y∘y∘y)ᵀ y]_ij / T − s_ii s_ij`
/// - `ρ̂ = Σ_i π_ii + Σ_{i≠j} (r̄/2)(√(s_jj/s_ii) θ_ij + √(s_ii/s_jj) θ_ji)`
/// - `γ̂ = ‖F − S‖²_F`
fn optimal_intensity(moments: &SampleMoments, target: &DMatrix<f64>) -> f64 {
    let y = &moments.centered;
    let s = &moments.sample;
    let t = y.nrows() as f64;
    let n = s.nrows();

    let gamma = (target - s).norm_squared();
    if gamma <= f64::MIN_POSITIVE {
        debug!("Target coincides with the sample covariance, no shrinkage");
        return 0.0;
    }

    let y2 = y.component_mul(y);
    let y3 = y2.component_mul(y);
    let pi_mat = (y2.transpose() * &y2) / t - s.component_mul(s);
    let theta = (y3.transpose() * y) / t;

    let pi_hat = pi_mat.sum();

    let mut rho_hat: f64 = (0..n).map(|i| pi_mat[(i, i)]).sum();
    let r_bar = moments.average_correlation;
    let std = &moments.std;
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let theta_ii_ij = theta[(i, j)] - s[(i, i)] * s[(i, j)];
            let theta_jj_ij = theta[(j, i)] - s[(j, j)] * s[(i, j)];
            rho_hat += 0.5
                * r_bar
                * ((std[j] / std[i]) * theta_ii_ij + (std[i] / std[j]) * theta_jj_ij);
        }
    }

    let kappa = (pi_hat - rho_hat) / gamma;
    debug!(pi_hat, rho_hat, gamma, kappa, "Shrinkage intensity moments");
    kappa / t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn panel(rows: &[Vec<f64>]) -> ReturnMatrix {
        let tickers = (0..rows[0].len()).map(|i| format!("T{}", i)).collect();
        ReturnMatrix::from_rows(tickers, rows).unwrap()
    }

    fn small_panel() -> ReturnMatrix {
        panel(&[
            vec![0.010, 0.020, -0.005],
            vec![-0.020, -0.010, 0.004],
            vec![0.015, 0.005, 0.010],
            vec![0.003, 0.012, -0.012],
            vec![-0.008, -0.015, 0.006],
            vec![0.011, 0.004, 0.002],
        ])
    }

    #[test]
    fn test_rejects_single_observation() {
        let result = LedoitWolf::new().shrink(&panel(&[vec![0.01, 0.02]]));
        assert!(matches!(result, Err(IndexingError::InsufficientData(_))));
    }

    #[test]
    fn test_rejects_zero_variance_series() {
        let result = LedoitWolf::new().shrink(&panel(&[
            vec![0.01, 0.0],
            vec![0.02, 0.0],
            vec![-0.01, 0.0],
        ]));
        match result {
            Err(IndexingError::InsufficientData(msg)) => assert!(msg.contains("T1")),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_near_flat_series() {
        // Variance ratio ~1e-16 against the other column
        let result = LedoitWolf::new().shrink(&panel(&[
            vec![0.01, 1e-10],
            vec![0.02, 0.0],
            vec![-0.01, 1e-10],
            vec![0.03, 0.0],
        ]));
        match result {
            Err(IndexingError::InsufficientData(msg)) => assert!(msg.contains("T1")),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_intensity_is_sample_covariance() {
        let returns = small_panel();
        let estimator = LedoitWolf::with_settings(ShrinkageSettings {
            fixed_intensity: Some(0.0),
            ..Default::default()
        });
        let estimate = estimator.shrink(&returns).unwrap();

        let centered = returns.centered();
        let sample = (centered.transpose() * &centered) / returns.observations() as f64;
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(estimate.covariance.get(i, j), sample[(i, j)], epsilon = 1e-15);
            }
        }
    }

    #[test]
    fn test_full_intensity_is_target() {
        let returns = small_panel();
        let estimator = LedoitWolf::with_settings(ShrinkageSettings {
            fixed_intensity: Some(1.0),
            ..Default::default()
        });
        let estimate = estimator.shrink(&returns).unwrap();
        let cov = &estimate.covariance;
        let r_bar = estimate.average_correlation;
        assert_relative_eq!(
            cov.get(0, 1),
            r_bar * cov.volatility(0) * cov.volatility(1),
            epsilon = 1e-15
        );
        assert_relative_eq!(
            cov.get(1, 2) / (cov.volatility(1) * cov.volatility(2)),
            r_bar,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_intensity_clipped_to_unit_interval() {
        let estimate = LedoitWolf::new().shrink(&small_panel()).unwrap();
        assert!((0.0..=1.0).contains(&estimate.intensity));
    }

    #[test]
    fn test_single_instrument_keeps_sample_variance() {
        let returns = panel(&[vec![0.01], vec![-0.01], vec![0.02]]);
        let estimate = LedoitWolf::new().shrink(&returns).unwrap();
        assert_eq!(estimate.intensity, 0.0);
        let mean = 0.02 / 3.0;
        let expected = [0.01_f64, -0.01, 0.02]
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / 3.0;
        assert_relative_eq!(estimate.covariance.variance(0), expected, epsilon = 1e-15);
    }

    #[test]
    fn test_target_positive_definite_bounds() {
        assert!(target_is_positive_definite(0.3, 10));
        assert!(!target_is_positive_definite(1.0, 10));
        assert!(!target_is_positive_definite(-0.2, 10));
        assert!(target_is_positive_definite(-0.05, 10));
    }
}
