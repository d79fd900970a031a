use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::errors::ProgError;
use crate::metrics::relative_accuracy;
use crate::uncertain::UncertainData;

/// Time-of-event predictions collected across a prognostic run, ordered by
/// the time each prediction was made.
///
/// The profile answers "how did the prediction evolve as evidence came in":
/// alpha-lambda compliance, prognostic horizon, cumulative relative
/// accuracy and monotonicity all read it.
#[derive(Default)]
pub struct ToePredictionProfile {
    entries: Vec<(f64, UncertainData)>,
}

impl ToePredictionProfile {
    pub fn new() -> Self {
        ToePredictionProfile::default()
    }

    /// Records the time-of-event distribution predicted at time `t`.
    /// Entries stay sorted by prediction time.
    pub fn add_prediction(&mut self, t: f64, toe: UncertainData) {
        let at = self.entries.partition_point(|(pt, _)| *pt <= t);
        self.entries.insert(at, (t, toe));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &UncertainData)> {
        self.entries.iter().map(|(t, toe)| (*t, toe))
    }

    /// Whether the prediction made at `t_lambda = t0 + lambda * (toe* - t0)`
    /// places at least `beta` of its mass within `toe* ± alpha * (toe* - t)`
    /// for each event, where `toe*` is that event's ground truth.
    ///
    /// `t0` is the first prediction time in the profile. The prediction
    /// used is the earliest one made at or after `t_lambda`.
    pub fn alpha_lambda(
        &self,
        ground_truth: &BTreeMap<String, f64>,
        lambda: f64,
        alpha: f64,
        beta: f64,
        seed: u64,
    ) -> Result<BTreeMap<String, bool>, ProgError> {
        let (t0, _) = *self.entries.first().ok_or(ProgError::EmptySamples)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut result = BTreeMap::new();
        for (key, toe_true) in ground_truth {
            let t_lambda = t0 + lambda * (toe_true - t0);
            let Some((t, toe)) = self
                .entries
                .iter()
                .find(|(pt, _)| *pt >= t_lambda)
                .map(|(pt, toe)| (*pt, toe))
            else {
                result.insert(key.clone(), false);
                continue;
            };
            let half_width = alpha * (toe_true - t);
            let bounds = BTreeMap::from([(
                key.clone(),
                (toe_true - half_width, toe_true + half_width),
            )]);
            let mass = toe.percentage_in_bounds(&bounds, &mut rng)?;
            result.insert(key.clone(), mass[key] >= beta);
        }
        Ok(result)
    }

    /// Prognostic horizon per event: `toe* - t_first`, where `t_first` is
    /// the earliest prediction time from which `criteria` accepts the
    /// prediction. NaN when no prediction ever qualifies.
    pub fn prognostic_horizon<F>(
        &self,
        criteria: F,
        ground_truth: &BTreeMap<String, f64>,
    ) -> Result<BTreeMap<String, f64>, ProgError>
    where
        F: Fn(f64, &UncertainData, &BTreeMap<String, f64>) -> Result<BTreeMap<String, bool>, ProgError>,
    {
        let mut horizon: BTreeMap<String, f64> =
            ground_truth.keys().map(|k| (k.clone(), f64::NAN)).collect();
        for (t, toe) in &self.entries {
            let ok = criteria(*t, toe, ground_truth)?;
            for (key, toe_true) in ground_truth {
                if horizon[key].is_nan() && ok.get(key).copied().unwrap_or(false) {
                    horizon.insert(key.clone(), toe_true - t);
                }
            }
            if horizon.values().all(|h| !h.is_nan()) {
                break;
            }
        }
        Ok(horizon)
    }

    /// Mean relative accuracy over every prediction in the profile.
    pub fn cumulative_relative_accuracy(
        &self,
        ground_truth: &BTreeMap<String, f64>,
    ) -> Result<BTreeMap<String, f64>, ProgError> {
        if self.entries.is_empty() {
            return Err(ProgError::EmptySamples);
        }
        let mut result = BTreeMap::new();
        for key in ground_truth.keys() {
            let mut sum = 0.0;
            for (_, toe) in &self.entries {
                let ra = relative_accuracy(toe, ground_truth)?;
                sum += ra[key];
            }
            result.insert(key.clone(), sum / self.entries.len() as f64);
        }
        Ok(result)
    }

    /// How consistently the predicted mean moves in one direction across
    /// the profile, per event: |sum of step signs| / (number of steps).
    /// 1 is strictly monotonic, 0 is direction-free wobble.
    pub fn monotonicity(&self) -> Result<BTreeMap<String, f64>, ProgError> {
        let (_, first) = self.entries.first().ok_or(ProgError::EmptySamples)?;
        let keys = first.keys().to_vec();
        let means: Vec<_> = self.entries.iter().map(|(_, toe)| toe.mean()).collect();
        let mut result = BTreeMap::new();
        for key in keys {
            let values: Vec<f64> = means
                .iter()
                .filter_map(|m| m.get(&key))
                .filter(|v| !v.is_nan())
                .collect();
            let m = if values.len() < 2 {
                1.0
            } else {
                // A zero step has no direction; f64::signum(0.0) is +1.
                let signed: f64 = values
                    .windows(2)
                    .map(|w| {
                        let d = w[1] - w[0];
                        if d == 0.0 {
                            0.0
                        } else {
                            d.signum()
                        }
                    })
                    .sum();
                signed.abs() / (values.len() - 1) as f64
            };
            result.insert(key, m);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::DVector;

    use crate::container::Schema;
    use crate::uncertain::UnweightedSamples;

    fn toe_at(values: &[f64]) -> UncertainData {
        UnweightedSamples::new(
            Schema::new(["impact"]),
            values.iter().map(|v| DVector::from_row_slice(&[*v])).collect(),
        )
        .into()
    }

    fn profile() -> ToePredictionProfile {
        // Predictions tighten around a true impact at t = 10.
        let mut p = ToePredictionProfile::new();
        p.add_prediction(0.0, toe_at(&[8.0, 10.0, 12.0]));
        p.add_prediction(4.0, toe_at(&[9.0, 10.0, 11.0]));
        p.add_prediction(8.0, toe_at(&[9.8, 10.0, 10.2]));
        p
    }

    #[test]
    fn predictions_stay_sorted() {
        let mut p = ToePredictionProfile::new();
        p.add_prediction(5.0, toe_at(&[10.0]));
        p.add_prediction(1.0, toe_at(&[12.0]));
        let times: Vec<f64> = p.iter().map(|(t, _)| t).collect();
        assert_eq!(times, vec![1.0, 5.0]);
    }

    #[test]
    fn tightening_profile_passes_alpha_lambda() {
        let gt = BTreeMap::from([("impact".to_string(), 10.0)]);
        // At lambda = 0.8 the prediction at t = 8 must put all mass within
        // 10 ± 0.5; samples {9.8, 10.0, 10.2} do.
        let ok = profile().alpha_lambda(&gt, 0.8, 0.25, 0.9, 1).unwrap();
        assert!(ok["impact"]);
    }

    #[test]
    fn constant_mean_has_no_direction() {
        let m = profile().monotonicity().unwrap();
        // The mean is 10 at every prediction time: zero steps in either
        // direction.
        assert_eq!(m["impact"], 0.0);
    }

    #[test]
    fn cumulative_relative_accuracy_is_high_for_accurate_profile() {
        let gt = BTreeMap::from([("impact".to_string(), 10.0)]);
        let cra = profile().cumulative_relative_accuracy(&gt).unwrap();
        assert!((cra["impact"] - 1.0).abs() < 1e-9);
    }
}
