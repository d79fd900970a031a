use na::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::container::{Container, Schema};
use crate::errors::ProgError;

use super::UnweightedSamples;

/// Variances below this are floored before factorisation so a deterministic
/// component does not make the covariance singular.
const VARIANCE_FLOOR: f64 = 1e-12;

/// Symmetry tolerance for covariance validation, relative to the largest
/// entry magnitude.
const SYMMETRY_TOL: f64 = 1e-9;

/// A multivariate Gaussian over a fixed key set: mean vector + covariance
/// matrix, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateNormalDist {
    schema: Schema,
    mean: DVector<f64>,
    cov: DMatrix<f64>,
}

impl MultivariateNormalDist {
    /// Validates shape and symmetry. The covariance must be square with one
    /// row per key and symmetric; positive semi-definiteness is enforced at
    /// sampling time (with diagonal flooring), not here.
    pub fn new(schema: Schema, mean: DVector<f64>, cov: DMatrix<f64>) -> Result<Self, ProgError> {
        let n = schema.len();
        if mean.len() != n {
            return Err(ProgError::DimensionMismatch {
                expected: n,
                got: mean.len(),
            });
        }
        if cov.nrows() != n || cov.ncols() != n {
            return Err(ProgError::InvalidCovariance(format!(
                "expected {n}x{n}, got {}x{}",
                cov.nrows(),
                cov.ncols()
            )));
        }
        let scale = cov.amax().max(1.0);
        for i in 0..n {
            for j in (i + 1)..n {
                if (cov[(i, j)] - cov[(j, i)]).abs() > SYMMETRY_TOL * scale {
                    return Err(ProgError::InvalidCovariance(format!(
                        "not symmetric at ({i}, {j})"
                    )));
                }
            }
        }
        Ok(MultivariateNormalDist { schema, mean, cov })
    }

    /// Convenience constructor from named means and per-key variances
    /// (diagonal covariance).
    pub fn from_means_and_stds(
        schema: Schema,
        mean: &Container,
        std: &Container,
    ) -> Result<Self, ProgError> {
        let variances: Vec<f64> = std.vector().iter().map(|s| s * s).collect();
        MultivariateNormalDist::new(
            schema,
            mean.vector().clone(),
            DMatrix::from_diagonal(&DVector::from_vec(variances)),
        )
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn mean_container(&self) -> Container {
        Container::new(self.schema.clone(), self.mean.clone())
            .expect("mean length validated at construction")
    }

    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }

    /// Draws `n` samples via `mean + L·z` with `L` the Cholesky factor of
    /// the (floored) covariance and `z` standard normal.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<UnweightedSamples, ProgError> {
        let l = self.cholesky_factor()?;
        let dim = self.schema.len();
        let samples = (0..n)
            .map(|_| {
                let z = DVector::from_fn(dim, |_, _| rng.sample::<f64, _>(StandardNormal));
                &self.mean + &l * z
            })
            .collect();
        Ok(UnweightedSamples::new(self.schema.clone(), samples))
    }

    pub(super) fn shift(&mut self, offset: &DVector<f64>) {
        self.mean += offset;
    }

    fn cholesky_factor(&self) -> Result<DMatrix<f64>, ProgError> {
        let mut floored = self.cov.clone();
        for i in 0..floored.nrows() {
            if floored[(i, i)] < VARIANCE_FLOOR {
                floored[(i, i)] = VARIANCE_FLOOR;
            }
        }
        match floored.clone().cholesky() {
            Some(chol) => Ok(chol.unpack()),
            None => {
                // Near-singular but not strictly PD after flooring; nudge
                // the whole diagonal and retry once before giving up.
                log::warn!("covariance near-singular, flooring diagonal for sampling");
                for i in 0..floored.nrows() {
                    floored[(i, i)] += 1e-9;
                }
                floored.cholesky().map(|c| c.unpack()).ok_or(ProgError::Cholesky)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_cov_round_trip_is_exact() {
        let schema = Schema::new(["a", "b"]);
        let mean = DVector::from_row_slice(&[5.0, 7.0]);
        let cov = DMatrix::from_row_slice(2, 2, &[0.3, 0.1, 0.1, 0.7]);
        let d = MultivariateNormalDist::new(schema, mean.clone(), cov.clone()).unwrap();
        assert_eq!(d.mean(), &mean);
        assert_eq!(d.cov(), &cov);
    }

    #[test]
    fn rejects_non_square_and_asymmetric_covariance() {
        let schema = Schema::new(["a", "b"]);
        let mean = DVector::from_row_slice(&[0.0, 0.0]);
        let wide = DMatrix::from_row_slice(2, 3, &[1.0; 6]);
        assert!(matches!(
            MultivariateNormalDist::new(schema.clone(), mean.clone(), wide),
            Err(ProgError::InvalidCovariance(_))
        ));
        let asym = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, -0.5, 1.0]);
        assert!(matches!(
            MultivariateNormalDist::new(schema, mean, asym),
            Err(ProgError::InvalidCovariance(_))
        ));
    }

    #[test]
    fn zero_variance_component_still_samples() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;
        let schema = Schema::new(["a", "b"]);
        let mean = DVector::from_row_slice(&[1.0, 2.0]);
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0]);
        let d = MultivariateNormalDist::new(schema, mean, cov).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let s = d.sample(50, &mut rng).unwrap();
        // The zero-variance key stays (essentially) at its mean.
        for v in s.key("b").unwrap() {
            assert!((v - 2.0).abs() < 1e-4);
        }
    }
}
