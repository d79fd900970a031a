//! The model contract.
//!
//! Anything that can be simulated, estimated against, or predicted from
//! implements [`Model`]: a state-transition function (continuous `dx` or
//! discrete `next_state`), an output function, and per-event progress and
//! threshold functions. The simulation engine and all filters and
//! predictors consume models only through this trait, so hand-written
//! physics, composites and trained surrogates are interchangeable.

use std::collections::BTreeMap;
use std::fmt;

use na::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::container::{Container, Schema};
use crate::errors::ProgError;

/// Noise configuration for process or measurement noise.
///
/// `Gaussian` holds one standard deviation per key of the target schema.
#[derive(Debug, Clone, Default)]
pub enum NoiseSpec {
    #[default]
    None,
    Gaussian(Container),
}

impl NoiseSpec {
    pub fn is_none(&self) -> bool {
        matches!(self, NoiseSpec::None)
    }

    /// Adds `scale * N(0, std)` elementwise. `scale` is the step size for
    /// process noise and 1 for measurement noise.
    pub fn apply<R: Rng + ?Sized>(&self, mut target: Container, scale: f64, rng: &mut R) -> Container {
        if let NoiseSpec::Gaussian(std) = self {
            for i in 0..target.len() {
                let sigma = std.vector()[i];
                if sigma > 0.0 {
                    // Normal::new only fails on non-finite sigma.
                    if let Ok(dist) = Normal::new(0.0, sigma) {
                        target.vector_mut()[i] += scale * dist.sample(rng);
                    }
                }
            }
        }
        target
    }
}

static NO_NOISE: NoiseSpec = NoiseSpec::None;

type Observer = Box<dyn Fn(&mut BTreeMap<String, f64>) + Send>;

/// Mutable model configuration: a name → value map with synchronous
/// observers invoked on assignment, so derived parameters can be recomputed
/// without any process-wide registry. The caller must not mutate parameters
/// while a simulate/estimate/predict call on the same model is in flight.
#[derive(Default)]
pub struct Parameters {
    values: BTreeMap<String, f64>,
    observers: Vec<(String, Observer)>,
}

impl Parameters {
    pub fn new<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        Parameters {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            observers: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Sets a value and synchronously runs every observer watching `key`.
    pub fn set(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
        for (watched, callback) in &self.observers {
            if watched == key {
                callback(&mut self.values);
            }
        }
    }

    /// Registers a derived-parameter callback fired whenever `key` changes.
    pub fn observe<F>(&mut self, key: &str, callback: F)
    where
        F: Fn(&mut BTreeMap<String, f64>) + Send + 'static,
    {
        self.observers.push((key.to_string(), Box::new(callback)));
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

impl fmt::Debug for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameters")
            .field("values", &self.values)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Declared physical bounds for a model's state, clipped (not failed) by
/// [`ModelExt::apply_limits`].
#[derive(Debug, Clone)]
pub struct StateLimits {
    pub lower: Container,
    pub upper: Container,
}

/// The abstract contract every simulatable system implements.
///
/// `dx` and `next_state` both have defaults: `next_state` falls back to a
/// forward-Euler step over `dx`, and `dx` to "not defined". A model must
/// override at least one; defining neither is a configuration error caught
/// at call time, not at construction. Likewise only one of
/// `event_state`/`threshold_met` needs to be supplied — the other is
/// derived (threshold met ⇔ event state 0). When both are supplied, both
/// are trusted as given; their mutual consistency is not validated.
pub trait Model {
    fn name(&self) -> &str;

    fn states(&self) -> &Schema;
    fn inputs(&self) -> &Schema;
    fn outputs(&self) -> &Schema;

    /// Declared event names, in a fixed order.
    fn events(&self) -> &[String] {
        &[]
    }

    /// First state, optionally informed by an initial input and output.
    fn initialize(&self, u: Option<&Container>, z: Option<&Container>) -> Container;

    /// Continuous state derivative. `None` = not defined for this model.
    fn dx(&self, _x: &Container, _u: &Container) -> Option<Container> {
        None
    }

    /// Discrete next state. Defaults to one forward-Euler step over `dx`.
    fn next_state(&self, x: &Container, u: &Container, dt: f64) -> Option<Container> {
        self.dx(x, u).map(|d| x.scaled_add(&d, dt))
    }

    /// Measurement function.
    fn output(&self, x: &Container) -> Container;

    /// Progress toward each event in [0, 1]; 1 = healthy, 0 = occurred.
    /// `None` = not defined (may be derived from `threshold_met`).
    fn event_state(&self, _x: &Container) -> Option<BTreeMap<String, f64>> {
        None
    }

    /// Whether each event's threshold has been met.
    /// `None` = not defined (may be derived from `event_state`).
    fn threshold_met(&self, _x: &Container) -> Option<BTreeMap<String, bool>> {
        None
    }

    fn state_limits(&self) -> Option<&StateLimits> {
        None
    }

    fn process_noise(&self) -> &NoiseSpec {
        &NO_NOISE
    }

    fn measurement_noise(&self) -> &NoiseSpec {
        &NO_NOISE
    }

    fn parameters(&self) -> Option<&Parameters> {
        None
    }

    fn parameters_mut(&mut self) -> Option<&mut Parameters> {
        None
    }
}

/// Derived operations available on every model. Blanket-implemented; the
/// engine and filters call these rather than the raw trait methods so that
/// fallback derivation, limit clipping and noise injection are uniform.
pub trait ModelExt: Model {
    /// `next_state`, with "neither dx nor next_state" turned into a
    /// configuration error instead of a silent no-op.
    fn step_state(&self, x: &Container, u: &Container, dt: f64) -> Result<Container, ProgError> {
        self.next_state(x, u, dt)
            .ok_or_else(|| ProgError::MissingTransition(self.name().to_string()))
    }

    /// Event state, derived from `threshold_met` when not supplied.
    fn event_state_of(&self, x: &Container) -> Result<BTreeMap<String, f64>, ProgError> {
        if let Some(es) = self.event_state(x) {
            return Ok(es);
        }
        if let Some(tm) = self.threshold_met(x) {
            return Ok(tm
                .into_iter()
                .map(|(k, met)| (k, if met { 0.0 } else { 1.0 }))
                .collect());
        }
        if self.events().is_empty() {
            return Ok(BTreeMap::new());
        }
        Err(ProgError::MissingEventFunction(self.name().to_string()))
    }

    /// Threshold predicate, derived from `event_state` when not supplied
    /// (met ⇔ event state has reached 0).
    fn threshold_met_of(&self, x: &Container) -> Result<BTreeMap<String, bool>, ProgError> {
        if let Some(tm) = self.threshold_met(x) {
            return Ok(tm);
        }
        if let Some(es) = self.event_state(x) {
            return Ok(es.into_iter().map(|(k, v)| (k, v <= 0.0)).collect());
        }
        if self.events().is_empty() {
            return Ok(BTreeMap::new());
        }
        Err(ProgError::MissingEventFunction(self.name().to_string()))
    }

    /// Clips the state to its declared physical bounds. Exceeding a bound
    /// is a warning-level event, never an error.
    fn apply_limits(&self, mut x: Container) -> Container {
        if let Some(limits) = self.state_limits() {
            for i in 0..x.len() {
                let v = x.vector()[i];
                let lo = limits.lower.vector()[i];
                let hi = limits.upper.vector()[i];
                if v < lo || v > hi {
                    log::warn!(
                        "state `{}` = {} outside limits [{}, {}], clipping",
                        x.keys()[i],
                        v,
                        lo,
                        hi
                    );
                    x.vector_mut()[i] = v.clamp(lo, hi);
                }
            }
        }
        x
    }

    fn apply_process_noise<R: Rng + ?Sized>(
        &self,
        x: Container,
        dt: f64,
        rng: &mut R,
    ) -> Container {
        self.process_noise().apply(x, dt, rng)
    }

    fn apply_measurement_noise<R: Rng + ?Sized>(&self, z: Container, rng: &mut R) -> Container {
        self.measurement_noise().apply(z, 1.0, rng)
    }
}

impl<M: Model + ?Sized> ModelExt for M {}

/// A model whose transition and output are linear:
/// `dx = A x + B u + E`, `z = C x + D`.
///
/// The Kalman filter requires this refinement; everything else treats a
/// `LinearModel` as any other [`Model`].
pub trait LinearModel: Model {
    fn a(&self) -> DMatrix<f64>;

    fn b(&self) -> DMatrix<f64> {
        DMatrix::zeros(self.states().len(), self.inputs().len())
    }

    fn c(&self) -> DMatrix<f64>;

    fn d(&self) -> DVector<f64> {
        DVector::zeros(self.outputs().len())
    }

    fn e(&self) -> DVector<f64> {
        DVector::zeros(self.states().len())
    }
}

/// `dx` of a linear model, usable as the body of `Model::dx`.
pub fn linear_dx<M: LinearModel + ?Sized>(model: &M, x: &Container, u: &Container) -> Container {
    let v = model.a() * x.vector() + model.b() * u.vector() + model.e();
    Container::new(x.schema().clone(), v).expect("A/B/E dimensions match the state schema")
}

/// `output` of a linear model, usable as the body of `Model::output`.
pub fn linear_output<M: LinearModel + ?Sized>(model: &M, x: &Container) -> Container {
    let v = model.c() * x.vector() + model.d();
    Container::new(model.outputs().clone(), v).expect("C/D dimensions match the output schema")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_fire_on_assignment() {
        let mut params = Parameters::new([("g", -9.81), ("g_half", -4.905)]);
        params.observe("g", |values| {
            let g = values["g"];
            values.insert("g_half".to_string(), g / 2.0);
        });
        params.set("g", -3.72);
        assert_eq!(params.get("g_half"), Some(-1.86));
    }
}
