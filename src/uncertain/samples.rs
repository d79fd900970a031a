use std::collections::BTreeMap;

use na::{DMatrix, DVector};
use rand::Rng;

use crate::container::{Container, Schema};
use crate::errors::ProgError;

/// An ordered collection of equally-weighted point samples over one schema.
///
/// A sample component may be NaN, meaning "no outcome" (e.g. an event that
/// never crossed within the horizon). Moments are computed over the
/// non-NaN values for each key, with a warning when any were skipped, so a
/// partially-met time-of-event distribution still reports a usable mean.
#[derive(Debug, Clone, PartialEq)]
pub struct UnweightedSamples {
    schema: Schema,
    samples: Vec<DVector<f64>>,
}

impl UnweightedSamples {
    pub fn new(schema: Schema, samples: Vec<DVector<f64>>) -> Self {
        debug_assert!(samples.iter().all(|s| s.len() == schema.len()));
        UnweightedSamples { schema, samples }
    }

    pub fn from_containers(samples: Vec<Container>) -> Result<Self, ProgError> {
        let first = samples.first().ok_or(ProgError::EmptySamples)?;
        let schema = first.schema().clone();
        for s in &samples {
            if s.schema() != &schema {
                return Err(ProgError::DimensionMismatch {
                    expected: schema.len(),
                    got: s.len(),
                });
            }
        }
        Ok(UnweightedSamples {
            schema,
            samples: samples.into_iter().map(Container::into_vector).collect(),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DVector<f64>> {
        self.samples.iter()
    }

    pub fn get(&self, i: usize) -> Option<Container> {
        self.samples
            .get(i)
            .map(|s| Container::new(self.schema.clone(), s.clone()).expect("lengths match"))
    }

    /// All stored values for one key, NaN entries included.
    pub fn key(&self, key: &str) -> Result<Vec<f64>, ProgError> {
        let i = self
            .schema
            .index_of(key)
            .ok_or_else(|| ProgError::UnknownKey(key.to_string()))?;
        Ok(self.samples.iter().map(|s| s[i]).collect())
    }

    pub fn mean(&self) -> Container {
        let n = self.schema.len();
        let mut mean = DVector::zeros(n);
        let mut skipped = false;
        for i in 0..n {
            let values: Vec<f64> = self
                .samples
                .iter()
                .map(|s| s[i])
                .filter(|v| !v.is_nan())
                .collect();
            if values.len() < self.samples.len() {
                skipped = true;
            }
            mean[i] = if values.is_empty() {
                f64::NAN
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
        }
        if skipped {
            log::warn!("some samples were NaN; mean is over the remaining samples");
        }
        Container::new(self.schema.clone(), mean).expect("lengths match")
    }

    /// Geometric median, approximated by the stored sample minimizing the
    /// total squared distance to all other samples. NaN samples are skipped.
    pub fn median(&self) -> Container {
        let candidates: Vec<&DVector<f64>> = self
            .samples
            .iter()
            .filter(|s| !s.iter().any(|v| v.is_nan()))
            .collect();
        if candidates.len() < self.samples.len() {
            log::warn!("some samples were NaN; median is over the remaining samples");
        }
        let best = candidates
            .iter()
            .min_by(|a, b| {
                let da: f64 = candidates.iter().map(|c| (**a - *c).norm_squared()).sum();
                let db: f64 = candidates.iter().map(|c| (**b - *c).norm_squared()).sum();
                da.partial_cmp(&db).expect("distances are finite")
            })
            .map(|s| (*s).clone())
            .unwrap_or_else(|| DVector::from_element(self.schema.len(), f64::NAN));
        Container::new(self.schema.clone(), best).expect("lengths match")
    }

    /// Sample covariance (unbiased, divisor n-1). NaN samples are skipped.
    pub fn cov(&self) -> DMatrix<f64> {
        let n = self.schema.len();
        let clean: Vec<&DVector<f64>> = self
            .samples
            .iter()
            .filter(|s| !s.iter().any(|v| v.is_nan()))
            .collect();
        if clean.len() < self.samples.len() {
            log::warn!("some samples were NaN; covariance is over the remaining samples");
        }
        if clean.len() < 2 {
            return DMatrix::zeros(n, n);
        }
        let mean = clean
            .iter()
            .fold(DVector::zeros(n), |acc, s| acc + *s)
            / clean.len() as f64;
        let mut cov = DMatrix::zeros(n, n);
        for s in &clean {
            let d = *s - &mean;
            cov += &d * d.transpose();
        }
        cov / (clean.len() as f64 - 1.0)
    }

    /// Resamples with replacement when `n` differs from the stored count;
    /// otherwise returns the stored samples as-is.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<UnweightedSamples, ProgError> {
        if self.samples.is_empty() {
            return Err(ProgError::EmptySamples);
        }
        if n == self.samples.len() {
            return Ok(self.clone());
        }
        let samples = (0..n)
            .map(|_| self.samples[rng.gen_range(0..self.samples.len())].clone())
            .collect();
        Ok(UnweightedSamples::new(self.schema.clone(), samples))
    }

    /// Fraction of samples strictly inside `(lower, upper)` for each
    /// requested key. NaN values count as outside.
    pub fn percentage_in_bounds(
        &self,
        bounds: &BTreeMap<String, (f64, f64)>,
    ) -> Result<BTreeMap<String, f64>, ProgError> {
        if self.samples.is_empty() {
            return Err(ProgError::EmptySamples);
        }
        let mut result = BTreeMap::new();
        for (key, (lower, upper)) in bounds {
            let i = self
                .schema
                .index_of(key)
                .ok_or_else(|| ProgError::UnknownKey(key.clone()))?;
            let inside = self
                .samples
                .iter()
                .filter(|s| s[i] > *lower && s[i] < *upper)
                .count();
            result.insert(key.clone(), inside as f64 / self.samples.len() as f64);
        }
        Ok(result)
    }

    pub(super) fn shift(&mut self, offset: &DVector<f64>) {
        for s in &mut self.samples {
            *s += offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn three_samples() -> UnweightedSamples {
        let schema = Schema::new(["a"]);
        UnweightedSamples::new(
            schema,
            vec![
                DVector::from_row_slice(&[1.0]),
                DVector::from_row_slice(&[2.0]),
                DVector::from_row_slice(&[6.0]),
            ],
        )
    }

    #[test]
    fn moments_and_key_access() {
        let s = three_samples();
        assert_eq!(s.mean().get("a"), Some(3.0));
        assert_eq!(s.median().get("a"), Some(2.0));
        assert_eq!(s.key("a").unwrap(), vec![1.0, 2.0, 6.0]);
        // Unbiased sample variance of {1, 2, 6} is 7.
        assert!((s.cov()[(0, 0)] - 7.0).abs() < 1e-12);
    }

    #[test]
    fn nan_samples_are_skipped_in_moments() {
        let schema = Schema::new(["a"]);
        let s = UnweightedSamples::new(
            schema,
            vec![
                DVector::from_row_slice(&[2.0]),
                DVector::from_row_slice(&[f64::NAN]),
                DVector::from_row_slice(&[4.0]),
            ],
        );
        assert_eq!(s.mean().get("a"), Some(3.0));
    }

    #[test]
    fn resampling_changes_count_only_when_asked() {
        let s = three_samples();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(s.sample(3, &mut rng).unwrap(), s);
        assert_eq!(s.sample(10, &mut rng).unwrap().len(), 10);
    }

    #[test]
    fn resampled_mean_converges_to_the_source_mean() {
        let s = three_samples();
        let mut rng = StdRng::seed_from_u64(17);
        let drawn = s.sample(20_000, &mut rng).unwrap();
        // Each draw has expectation 3, so 20k of them land well within 0.1.
        assert!((drawn.mean().get("a").unwrap() - 3.0).abs() < 0.1);
    }

    #[test]
    fn bounds_containment_is_strict() {
        let s = three_samples();
        let bounds = BTreeMap::from([("a".to_string(), (0.0, 3.0))]);
        let pib = s.percentage_in_bounds(&bounds).unwrap();
        assert!((pib["a"] - 2.0 / 3.0).abs() < 1e-12);
    }
}
