//! Future-state and time-of-event predictors.
//!
//! A predictor takes the current state belief, a future-loading profile and
//! a prediction horizon, and returns the uncertain future: state, output
//! and event-state snapshots on a save grid, plus a time-of-event
//! distribution per monitored event. Two strategies are provided:
//! [`MonteCarloPredictor`] (sample the belief, simulate each realization
//! with noise) and [`UnscentedTransformPredictor`] (propagate a sigma-point
//! deck deterministically and reconstruct Gaussian moments).

mod monte_carlo;
mod prediction;
mod profile;
mod unscented;

pub use monte_carlo::MonteCarloPredictor;
pub use prediction::{Prediction, PredictionResult};
pub use profile::ToePredictionProfile;
pub use unscented::UnscentedTransformPredictor;

use crate::errors::ProgError;
use crate::loading::LoadProfile;
use crate::simulation::{Integrator, StepPolicy};
use crate::uncertain::UncertainData;

/// What "the event happened" means for a run that monitors several events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventStrategy {
    /// A realization is finished when its first monitored event occurs;
    /// later events keep an absent (NaN) time-of-event.
    First,
    /// A realization keeps evolving past each event until every monitored
    /// event has occurred or the horizon is reached.
    #[default]
    All,
}

/// Prediction configuration, shared by both predictors.
pub struct PredictConfig {
    /// Prediction start time.
    pub t0: f64,
    /// Step-size policy for the underlying simulations.
    pub step: StepPolicy,
    pub integrator: Integrator,
    /// Horizon, as a duration past `t0`. Must be finite and positive;
    /// prediction never runs unbounded.
    pub horizon: f64,
    /// Snapshot period past `t0`. `None` with empty `save_pts` records
    /// only the endpoints.
    pub save_freq: Option<f64>,
    /// Extra absolute snapshot times.
    pub save_pts: Vec<f64>,
    /// Realization count for Monte Carlo. `None` keeps the sample count of
    /// an [`UncertainData::Samples`] belief, or falls back to 100.
    pub n_samples: Option<usize>,
    /// Events to predict. `None` = all the model declares.
    pub events: Option<Vec<String>>,
    pub event_strategy: EventStrategy,
    /// Evaluate the load once at `t0` and hold that value for the whole
    /// horizon, for playback scenarios with no future load data.
    pub const_load: bool,
    /// Seed for sampling and process noise; fresh entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for PredictConfig {
    fn default() -> Self {
        PredictConfig {
            t0: 0.0,
            step: StepPolicy::Fixed(1.0),
            integrator: Integrator::Euler,
            horizon: f64::INFINITY,
            save_freq: None,
            save_pts: Vec::new(),
            n_samples: None,
            events: None,
            event_strategy: EventStrategy::All,
            const_load: false,
            seed: None,
        }
    }
}

impl PredictConfig {
    fn checked_horizon(&self) -> Result<f64, ProgError> {
        if !self.horizon.is_finite() || self.horizon <= 0.0 {
            return Err(ProgError::UnboundedPrediction);
        }
        Ok(self.horizon)
    }

    /// The common snapshot grid, starting at `t0` and ending at the
    /// horizon. Realizations are aligned to this grid so snapshots can be
    /// aggregated across them.
    fn save_grid(&self) -> Vec<f64> {
        let t_end = self.t0 + self.horizon;
        let mut grid = vec![self.t0];
        if let Some(freq) = self.save_freq {
            let mut t = self.t0 + freq;
            while t < t_end - 1e-12 {
                grid.push(t);
                t += freq;
            }
        }
        grid.extend(
            self.save_pts
                .iter()
                .copied()
                .filter(|p| *p > self.t0 && *p < t_end),
        );
        grid.push(t_end);
        grid.sort_by(|a, b| a.partial_cmp(b).expect("grid times must not be NaN"));
        grid.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
        grid
    }
}

/// Common surface of the predictors.
pub trait Predictor {
    fn predict<L: LoadProfile + ?Sized>(
        &self,
        state: &UncertainData,
        load: &L,
        cfg: &PredictConfig,
    ) -> Result<PredictionResult, ProgError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_horizon_is_rejected() {
        let cfg = PredictConfig::default();
        assert!(matches!(
            cfg.checked_horizon(),
            Err(ProgError::UnboundedPrediction)
        ));
    }

    #[test]
    fn save_grid_spans_to_horizon() {
        let cfg = PredictConfig {
            horizon: 10.0,
            save_freq: Some(4.0),
            save_pts: vec![5.0],
            ..PredictConfig::default()
        };
        assert_eq!(cfg.save_grid(), vec![0.0, 4.0, 5.0, 8.0, 10.0]);
    }
}
