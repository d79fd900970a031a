use na::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::container::Container;
use crate::errors::ProgError;
use crate::model::{Model, ModelExt, NoiseSpec};
use crate::uncertain::{UncertainData, UnweightedSamples};

use super::StateEstimator;

/// Fallback per-output likelihood standard deviation when the model
/// declares no measurement noise.
const DEFAULT_MEASUREMENT_STD: f64 = 1e-3;

/// A particle filter.
///
/// The belief is an unweighted set of N particles. Each estimate call
/// propagates every particle independently through the noisy state
/// transition, weights it by the Gaussian likelihood of the measurement in
/// output space, and resamples N particles with replacement (systematic
/// resampling), restoring an unweighted set. Weight degeneracy is reported
/// with a warning and the update falls back to uniform weights rather than
/// silently producing NaNs.
pub struct ParticleFilter<'a, M: Model + ?Sized> {
    model: &'a M,
    t: f64,
    dt_max: f64,
    particles: Vec<DVector<f64>>,
    measurement_std: DVector<f64>,
    rng: StdRng,
}

impl<'a, M: Model + ?Sized> ParticleFilter<'a, M> {
    /// Builds the filter by sampling `num_particles` from the initial
    /// belief. An [`UnweightedSamples`] belief whose size already matches
    /// is used directly.
    pub fn build(
        model: &'a M,
        x0: &UncertainData,
        num_particles: usize,
        seed: u64,
    ) -> Result<Self, ProgError> {
        if num_particles == 0 {
            return Err(ProgError::EmptySamples);
        }
        if x0.schema() != model.states() {
            return Err(ProgError::DimensionMismatch {
                expected: model.states().len(),
                got: x0.schema().len(),
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let particles = x0
            .sample(num_particles, &mut rng)?
            .iter()
            .cloned()
            .collect();

        let m = model.outputs().len();
        let measurement_std = match model.measurement_noise() {
            NoiseSpec::Gaussian(std) => std.vector().clone(),
            NoiseSpec::None => DVector::from_element(m, DEFAULT_MEASUREMENT_STD),
        };

        Ok(ParticleFilter {
            model,
            t: -1e-99,
            dt_max: f64::INFINITY,
            particles,
            measurement_std,
            rng,
        })
    }

    pub fn with_t0(mut self, t0: f64) -> Self {
        self.t = t0;
        self
    }

    pub fn with_dt_max(mut self, dt_max: f64) -> Self {
        self.dt_max = dt_max;
        self
    }

    /// Overrides the likelihood standard deviation per output key.
    pub fn with_measurement_std(mut self, std: &Container) -> Result<Self, ProgError> {
        if std.len() != self.measurement_std.len() {
            return Err(ProgError::DimensionMismatch {
                expected: self.measurement_std.len(),
                got: std.len(),
            });
        }
        self.measurement_std = std.vector().clone();
        Ok(self)
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// Systematic resampling: one uniform offset, N evenly spaced
    /// positions walked through the cumulative weights.
    fn resample(&mut self, weights: &[f64]) {
        let n = self.particles.len();
        let offset: f64 = self.rng.gen::<f64>() / n as f64;
        let mut resampled = Vec::with_capacity(n);
        let mut cumulative = weights[0];
        let mut j = 0usize;
        for i in 0..n {
            let position = offset + i as f64 / n as f64;
            while position > cumulative && j + 1 < n {
                j += 1;
                cumulative += weights[j];
            }
            resampled.push(self.particles[j].clone());
        }
        self.particles = resampled;
    }
}

impl<M: Model + ?Sized> StateEstimator for ParticleFilter<'_, M> {
    fn estimate(&mut self, t: f64, u: &Container, z: &Container) -> Result<(), ProgError> {
        let steps = super::substeps(self.t, t, self.dt_max)?;
        self.t = t;

        let m = self.model.outputs().len();
        let mut measured = DVector::zeros(m);
        for (i, key) in self.model.outputs().keys().iter().enumerate() {
            measured[i] = z.try_get(key)?;
        }

        // Propagate every particle (with process noise) and score it by
        // the Gaussian log-likelihood of the measurement.
        let mut log_weights = vec![0.0_f64; self.particles.len()];
        for (particle, log_w) in self.particles.iter_mut().zip(log_weights.iter_mut()) {
            let mut x = Container::new(self.model.states().clone(), particle.clone())?;
            for dt in &steps {
                let next = self.model.step_state(&x, u, *dt)?;
                let noisy = self.model.apply_process_noise(next, *dt, &mut self.rng);
                x = self.model.apply_limits(noisy);
            }
            let predicted = self.model.output(&x);
            for i in 0..m {
                let sigma = self.measurement_std[i].max(f64::MIN_POSITIVE);
                let residual = (measured[i] - predicted.vector()[i]) / sigma;
                *log_w += -0.5 * residual * residual - sigma.ln();
            }
            *particle = x.into_vector();
        }

        // Shift by the max log weight before exponentiating; the largest
        // weight becomes 1 and the common constant cancels when
        // normalising, which keeps very unlikely measurement sets from
        // rounding every weight to zero.
        let max_log = log_weights
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let mut weights: Vec<f64> = log_weights.iter().map(|lw| (lw - max_log).exp()).collect();
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            log::warn!("particle weights degenerate (total = {total}), using uniform weights");
            let uniform = 1.0 / weights.len() as f64;
            weights.fill(uniform);
        } else {
            for w in &mut weights {
                *w /= total;
            }
        }

        self.resample(&weights);
        Ok(())
    }

    fn current_estimate(&self) -> UncertainData {
        UnweightedSamples::new(self.model.states().clone(), self.particles.clone()).into()
    }

    fn time(&self) -> f64 {
        self.t
    }
}
