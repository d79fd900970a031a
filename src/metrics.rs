//! Metrics over time-of-event distributions.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::errors::ProgError;
use crate::uncertain::{UncertainData, UnweightedSamples};

/// Samples drawn when a moment-based distribution has to answer a
/// sample-space question.
const METRIC_SAMPLES: usize = 10_000;

/// Probability that each event has not yet occurred at `time`.
///
/// A NaN outcome means the event never occurred in that realization, which
/// counts as survival at every mission time.
pub fn prob_success(
    toe: &UncertainData,
    time: f64,
    seed: u64,
) -> Result<BTreeMap<String, f64>, ProgError> {
    let samples: UnweightedSamples = match toe {
        UncertainData::Samples(s) => s.clone(),
        other => {
            let mut rng = StdRng::seed_from_u64(seed);
            other.sample(METRIC_SAMPLES, &mut rng)?
        }
    };
    if samples.is_empty() {
        return Err(ProgError::EmptySamples);
    }
    let mut result = BTreeMap::new();
    for key in samples.schema().keys().to_vec() {
        let values = samples.key(&key)?;
        let surviving = values.iter().filter(|v| !(**v <= time)).count();
        result.insert(key, surviving as f64 / values.len() as f64);
    }
    Ok(result)
}

/// Relative accuracy of the predicted mean against the ground truth:
/// `1 - |toe* - mean| / toe*` per event. An absent (NaN) mean yields NaN.
pub fn relative_accuracy(
    toe: &UncertainData,
    ground_truth: &BTreeMap<String, f64>,
) -> Result<BTreeMap<String, f64>, ProgError> {
    let mean = toe.mean();
    let mut result = BTreeMap::new();
    for (key, toe_true) in ground_truth {
        let m = mean.try_get(key)?;
        result.insert(key.clone(), 1.0 - (toe_true - m).abs() / toe_true);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::DVector;

    use crate::container::Schema;

    fn toe_samples(values: &[f64]) -> UncertainData {
        UnweightedSamples::new(
            Schema::new(["impact"]),
            values.iter().map(|v| DVector::from_row_slice(&[*v])).collect(),
        )
        .into()
    }

    #[test]
    fn survival_counts_absent_outcomes() {
        // One realization never reached the event at all.
        let toe = toe_samples(&[4.0, 6.0, 8.0, f64::NAN]);
        let ps = prob_success(&toe, 5.0, 0).unwrap();
        assert!((ps["impact"] - 0.75).abs() < 1e-12);
        let ps = prob_success(&toe, 100.0, 0).unwrap();
        assert!((ps["impact"] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn relative_accuracy_of_exact_mean_is_one() {
        let toe = toe_samples(&[9.0, 10.0, 11.0]);
        let gt = BTreeMap::from([("impact".to_string(), 10.0)]);
        let ra = relative_accuracy(&toe, &gt).unwrap();
        assert!((ra["impact"] - 1.0).abs() < 1e-12);
    }
}
