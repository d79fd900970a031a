//! Sigma-point sampling for unscented-transform methods.
//!
//! A deterministic 2n+1-point sample set that captures a distribution's
//! mean and covariance through a nonlinear transform. Shared by the
//! unscented Kalman filter and the unscented-transform predictor.

use na::{DMatrix, DVector};

use crate::errors::ProgError;

/// Any sampling method implementing this trait can drive the UKF and the
/// unscented-transform predictor.
pub trait SamplingMethod {
    /// Weights for reconstituting the mean.
    fn weights_m(&self) -> &DVector<f64>;

    /// Weights for reconstituting the covariance.
    fn weights_c(&self) -> &DVector<f64>;

    fn num_points(&self) -> usize;

    /// Generates the sigma points for `mean`/`p`, one per column.
    fn sampling_states(
        &self,
        p: &DMatrix<f64>,
        mean: &DVector<f64>,
    ) -> Result<DMatrix<f64>, ProgError>;
}

/// Merwe scaled symmetric sigma points: the mean plus a pair of points per
/// state dimension, spread by `sqrt(n + lambda)` along the Cholesky factor
/// of the covariance.
///
/// `alpha` controls the spread from the mean (typically in [1e-4, 1]);
/// `beta` weights the center point for covariance (2 is optimal for a
/// Gaussian prior); `kappa` is a secondary scaling parameter.
#[derive(Debug, Clone)]
pub struct MerweScaledSigmaPoints {
    n: usize,
    weights_m: DVector<f64>,
    weights_c: DVector<f64>,
    lambda_plus_n: f64,
}

impl MerweScaledSigmaPoints {
    pub fn new(n: usize, alpha: f64, beta: f64, kappa: f64) -> Self {
        let mut kappa = kappa;
        let mut lambda = alpha.powi(2) * (n as f64 + kappa) - n as f64;
        if lambda + n as f64 <= 0.0 {
            // Degenerate scaling (possible for small n with the default
            // kappa); fall back to the standard kappa = 3 - n.
            log::warn!("sigma point scaling degenerate for n = {n}, using kappa = 3 - n");
            kappa = 3.0 - n as f64;
            lambda = alpha.powi(2) * (n as f64 + kappa) - n as f64;
        }
        let lambda_plus_n = lambda + n as f64;

        let count = 2 * n + 1;
        let mut weights_m = DVector::from_element(count, 0.5 / lambda_plus_n);
        let mut weights_c = weights_m.clone();
        weights_m[0] = lambda / lambda_plus_n;
        weights_c[0] = weights_m[0] + (1.0 - alpha.powi(2) + beta);

        MerweScaledSigmaPoints {
            n,
            weights_m,
            weights_c,
            lambda_plus_n,
        }
    }
}

impl SamplingMethod for MerweScaledSigmaPoints {
    fn weights_m(&self) -> &DVector<f64> {
        &self.weights_m
    }

    fn weights_c(&self) -> &DVector<f64> {
        &self.weights_c
    }

    fn num_points(&self) -> usize {
        2 * self.n + 1
    }

    fn sampling_states(
        &self,
        p: &DMatrix<f64>,
        mean: &DVector<f64>,
    ) -> Result<DMatrix<f64>, ProgError> {
        let n = self.n;
        let mut floored = p.clone();
        for i in 0..n {
            if floored[(i, i)] < 1e-12 {
                floored[(i, i)] = 1e-12;
            }
        }
        let cho = floored.cholesky().ok_or(ProgError::Cholesky)?.unpack();
        let spread = self.lambda_plus_n.sqrt();

        let mut samples = DMatrix::zeros(n, 2 * n + 1);
        for (i, mut col) in samples.column_iter_mut().enumerate() {
            if i == 0 {
                col.copy_from(mean);
            } else if i <= n {
                let chi = mean + spread * cho.column(i - 1);
                col.copy_from(&chi);
            } else {
                let chi = mean - spread * cho.column(i - n - 1);
                col.copy_from(&chi);
            }
        }
        Ok(samples)
    }
}

/// Reconstitutes a mean and covariance from transformed sigma points
/// (one point per column).
pub fn unscented_transform(
    points: &DMatrix<f64>,
    weights_m: &DVector<f64>,
    weights_c: &DVector<f64>,
) -> (DVector<f64>, DMatrix<f64>) {
    let dim = points.nrows();
    let mean = points
        .column_iter()
        .zip(weights_m.iter())
        .fold(DVector::zeros(dim), |acc, (x, w)| acc + *w * x);
    let cov = points
        .column_iter()
        .zip(weights_c.iter())
        .fold(DMatrix::zeros(dim, dim), |acc, (x, w)| {
            let d = x - &mean;
            acc + *w * &d * d.transpose()
        });
    (mean, cov)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigma_points_round_trip_mean_and_cov() {
        let sampling = MerweScaledSigmaPoints::new(2, 1.0, 2.0, 0.0);
        let mean = DVector::from_row_slice(&[1.0, -3.0]);
        let p = DMatrix::from_row_slice(2, 2, &[0.5, 0.2, 0.2, 1.0]);
        let points = sampling.sampling_states(&p, &mean).unwrap();
        assert_eq!(points.ncols(), 5);

        let (m, c) = unscented_transform(&points, sampling.weights_m(), sampling.weights_c());
        assert!((m - &mean).amax() < 1e-10);
        assert!((c - &p).amax() < 1e-10);
    }

    #[test]
    fn weights_m_sum_to_one() {
        let sampling = MerweScaledSigmaPoints::new(3, 1e-3, 2.0, 0.0);
        assert!((sampling.weights_m().sum() - 1.0).abs() < 1e-9);
    }
}
