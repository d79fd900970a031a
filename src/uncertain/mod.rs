//! Representations of a value with uncertainty.
//!
//! Three concrete shapes share one query surface: [`ScalarData`] (a point,
//! no uncertainty), [`MultivariateNormalDist`] (mean + covariance) and
//! [`UnweightedSamples`] (equally-weighted point set). [`UncertainData`] is
//! the tagged union the estimators and predictors pass around; queries go
//! through it so callers never special-case the representation.

mod multivariate;
mod samples;
mod scalar;

pub use multivariate::MultivariateNormalDist;
pub use samples::UnweightedSamples;
pub use scalar::ScalarData;

use std::collections::BTreeMap;
use std::ops::{Add, Sub};

use na::{DMatrix, DVector};
use rand::Rng;

use crate::container::{Container, Schema};
use crate::errors::ProgError;

/// Samples drawn when a moment-based representation has to answer a
/// sample-space question (bounds containment).
const BOUNDS_SAMPLES: usize = 10_000;

/// A distribution over a fixed key set.
#[derive(Debug, Clone)]
pub enum UncertainData {
    Scalar(ScalarData),
    MultivariateNormal(MultivariateNormalDist),
    Samples(UnweightedSamples),
}

impl UncertainData {
    pub fn schema(&self) -> &Schema {
        match self {
            UncertainData::Scalar(d) => d.schema(),
            UncertainData::MultivariateNormal(d) => d.schema(),
            UncertainData::Samples(d) => d.schema(),
        }
    }

    pub fn keys(&self) -> &[String] {
        self.schema().keys()
    }

    pub fn mean(&self) -> Container {
        match self {
            UncertainData::Scalar(d) => d.point().clone(),
            UncertainData::MultivariateNormal(d) => d.mean_container(),
            UncertainData::Samples(d) => d.mean(),
        }
    }

    pub fn median(&self) -> Container {
        match self {
            UncertainData::Scalar(d) => d.point().clone(),
            // For a normal distribution the median is the mean.
            UncertainData::MultivariateNormal(d) => d.mean_container(),
            UncertainData::Samples(d) => d.median(),
        }
    }

    pub fn cov(&self) -> DMatrix<f64> {
        match self {
            UncertainData::Scalar(d) => DMatrix::zeros(d.schema().len(), d.schema().len()),
            UncertainData::MultivariateNormal(d) => d.cov().clone(),
            UncertainData::Samples(d) => d.cov(),
        }
    }

    /// Draws `n` samples. For [`ScalarData`] this is `n` copies of the
    /// point; for [`UnweightedSamples`] a resample with replacement when
    /// `n` differs from the stored count.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<UnweightedSamples, ProgError> {
        match self {
            UncertainData::Scalar(d) => Ok(d.sample(n)),
            UncertainData::MultivariateNormal(d) => d.sample(n, rng),
            UncertainData::Samples(d) => d.sample(n, rng),
        }
    }

    /// Fraction of the distribution inside `(lower, upper)` per key.
    /// Moment-based representations answer by sampling; NaN values (absent
    /// outcomes) count as out of bounds.
    pub fn percentage_in_bounds<R: Rng + ?Sized>(
        &self,
        bounds: &BTreeMap<String, (f64, f64)>,
        rng: &mut R,
    ) -> Result<BTreeMap<String, f64>, ProgError> {
        match self {
            UncertainData::Samples(d) => d.percentage_in_bounds(bounds),
            UncertainData::Scalar(d) => d.sample(1).percentage_in_bounds(bounds),
            UncertainData::MultivariateNormal(d) => {
                d.sample(BOUNDS_SAMPLES, rng)?.percentage_in_bounds(bounds)
            }
        }
    }

    /// Shifts the whole distribution by a per-key offset. Covariance and
    /// sample spread are unchanged.
    pub fn shift_vector(&mut self, offset: &DVector<f64>) -> Result<(), ProgError> {
        let n = self.schema().len();
        if offset.len() != n {
            return Err(ProgError::DimensionMismatch {
                expected: n,
                got: offset.len(),
            });
        }
        match self {
            UncertainData::Scalar(d) => d.shift(offset),
            UncertainData::MultivariateNormal(d) => d.shift(offset),
            UncertainData::Samples(d) => d.shift(offset),
        }
        Ok(())
    }

    pub fn shift_scalar(&mut self, offset: f64) {
        let offset = DVector::from_element(self.schema().len(), offset);
        // Lengths match by construction.
        let _ = self.shift_vector(&offset);
    }
}

impl From<ScalarData> for UncertainData {
    fn from(d: ScalarData) -> Self {
        UncertainData::Scalar(d)
    }
}

impl From<MultivariateNormalDist> for UncertainData {
    fn from(d: MultivariateNormalDist) -> Self {
        UncertainData::MultivariateNormal(d)
    }
}

impl From<UnweightedSamples> for UncertainData {
    fn from(d: UnweightedSamples) -> Self {
        UncertainData::Samples(d)
    }
}

impl Add<f64> for UncertainData {
    type Output = UncertainData;

    fn add(mut self, rhs: f64) -> UncertainData {
        self.shift_scalar(rhs);
        self
    }
}

impl Sub<f64> for UncertainData {
    type Output = UncertainData;

    fn sub(mut self, rhs: f64) -> UncertainData {
        self.shift_scalar(-rhs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn schema() -> Schema {
        Schema::new(["a", "b"])
    }

    #[test]
    fn shift_moves_mean_only() {
        let mvn = MultivariateNormalDist::new(
            schema(),
            DVector::from_row_slice(&[1.0, 2.0]),
            DMatrix::from_row_slice(2, 2, &[0.5, 0.1, 0.1, 0.5]),
        )
        .unwrap();
        let shifted = UncertainData::from(mvn) + 3.0;
        assert_eq!(shifted.mean().get("a"), Some(4.0));
        assert_eq!(shifted.cov()[(0, 0)], 0.5);
    }

    #[test]
    fn sample_mean_converges_across_variants() {
        let mut rng = StdRng::seed_from_u64(7);
        let mvn: UncertainData = MultivariateNormalDist::new(
            schema(),
            DVector::from_row_slice(&[4.0, -2.0]),
            DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]),
        )
        .unwrap()
        .into();
        let drawn = mvn.sample(20_000, &mut rng).unwrap();
        let m = drawn.mean();
        assert!((m.get("a").unwrap() - 4.0).abs() < 0.05);
        assert!((m.get("b").unwrap() + 2.0).abs() < 0.07);

        let point = Container::from_pairs(schema(), [("a", 3.0), ("b", 1.0)]).unwrap();
        let scalar: UncertainData = ScalarData::new(point).into();
        let drawn = scalar.sample(10, &mut rng).unwrap();
        assert_eq!(drawn.len(), 10);
        assert_eq!(drawn.mean().get("a"), Some(3.0));
    }
}
