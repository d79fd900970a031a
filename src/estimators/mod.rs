//! State estimation: inferring the current hidden state of a monitored
//! system from a stream of noisy (time, input, measurement) observations.
//!
//! Every estimator is constructed ready from an initial belief and then
//! driven by repeated [`StateEstimator::estimate`] calls for the life of
//! the system; there is no terminal state. The current belief is always
//! available as an [`UncertainData`].

mod kalman;
mod particle;
mod ukf;

pub use kalman::KalmanFilter;
pub use particle::ParticleFilter;
pub use ukf::UnscentedKalmanFilter;

use crate::container::Container;
use crate::errors::ProgError;
use crate::uncertain::UncertainData;

/// Default process/measurement noise covariance scale when none is given.
pub(crate) const DEFAULT_COV: f64 = 1e-3;

/// Common surface of all state estimators.
pub trait StateEstimator {
    /// Incorporates one observation: measured inputs `u` and outputs `z`
    /// at time `t`. `t` must be strictly after the previous call's time.
    fn estimate(&mut self, t: f64, u: &Container, z: &Container) -> Result<(), ProgError>;

    /// The current belief about the hidden state.
    fn current_estimate(&self) -> UncertainData;

    /// Time of the most recent observation.
    fn time(&self) -> f64;
}

/// Shared bookkeeping: validates monotonic time and yields the sequence of
/// substep sizes covering `(prev, t]`, each at most `dt_max`. Filters that
/// are unstable over a large measurement gap set a small `dt_max` to force
/// multiple prediction substeps per estimate call. Always yields at least
/// one step, so a negligible gap still produces one (tiny) predict.
pub(crate) fn substeps(prev: f64, t: f64, dt_max: f64) -> Result<Vec<f64>, ProgError> {
    if t <= prev {
        return Err(ProgError::NonmonotonicTime { t, prev });
    }
    if dt_max <= 0.0 {
        return Err(ProgError::InvalidStepSize(dt_max));
    }
    let mut steps = Vec::new();
    let mut at = prev;
    while at < t - 1e-12 {
        let step = (t - at).min(dt_max);
        steps.push(step);
        at += step;
    }
    if steps.is_empty() {
        steps.push(t - prev);
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substeps_cover_the_gap_without_overshoot() {
        let steps = substeps(0.0, 1.0, 0.4).unwrap();
        assert_eq!(steps.len(), 3);
        assert!((steps.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(steps.iter().all(|s| *s <= 0.4 + 1e-12));
    }

    #[test]
    fn negligible_gap_still_yields_one_step() {
        let steps = substeps(-1e-99, 0.0, f64::INFINITY).unwrap();
        assert_eq!(steps.len(), 1);
        let steps = substeps(5.0, 5.0 + 1e-13, 0.1).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn time_must_increase() {
        assert!(substeps(2.0, 2.0, 0.1).is_err());
        assert!(substeps(2.0, 1.0, 0.1).is_err());
    }
}
