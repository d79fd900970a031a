//! The simulation engine.
//!
//! Advances one model instance in time under a future-loading profile,
//! stopping when a monitored event's threshold is met or the end time is
//! reached. Handles step-size policy, integration scheme, process-noise
//! injection, state-limit clipping and snapshot scheduling.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::container::Container;
use crate::errors::ProgError;
use crate::loading::LoadProfile;
use crate::model::{Model, ModelExt};

/// Relative window below which threshold-crossing bisection stops.
const CROSSING_TOL: f64 = 1e-9;

/// How the step size for the next step is chosen.
#[derive(Clone)]
pub enum StepPolicy {
    /// Constant step. The final step may still be truncated to land on the
    /// event crossing or the end time.
    Fixed(f64),
    /// State-dependent step, e.g. refined as an event state approaches 0.
    Fn(Arc<dyn Fn(f64, &Container) -> f64>),
    /// Steps of at most `max`, shrunk to land exactly on every requested
    /// save point without overshoot.
    Auto { max: f64 },
}

impl StepPolicy {
    pub(crate) fn base(&self, t: f64, x: &Container) -> f64 {
        match self {
            StepPolicy::Fixed(dt) => *dt,
            StepPolicy::Fn(f) => f(t, x),
            StepPolicy::Auto { max } => *max,
        }
    }
}

/// Integration scheme used when the model supplies a continuous `dx`.
/// Discrete models (custom `next_state`) ignore this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrator {
    #[default]
    Euler,
    Rk4,
}

/// Engine configuration. Shared by direct simulation and by predictors.
#[derive(Clone)]
pub struct SimConfig {
    pub step: StepPolicy,
    pub integrator: Integrator,
    /// Snapshot period, anchored at the start time. `None` with empty
    /// `save_pts` means every step is recorded.
    pub save_freq: Option<f64>,
    /// Extra snapshot times.
    pub save_pts: Vec<f64>,
    /// Events to monitor for stopping. `None` = all declared events.
    pub events: Option<Vec<String>>,
    /// Whether process noise is injected after each transition.
    pub apply_noise: bool,
    /// Seed for the noise stream; fresh entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            step: StepPolicy::Fixed(1.0),
            integrator: Integrator::Euler,
            save_freq: None,
            save_pts: Vec::new(),
            events: None,
            apply_noise: true,
            seed: None,
        }
    }
}

/// Ordered, time-indexed record of saved simulation points. Owned by the
/// caller once returned; the engine never retains it.
#[derive(Debug, Clone, Default)]
pub struct SimResult {
    pub times: Vec<f64>,
    pub inputs: Vec<Container>,
    pub states: Vec<Container>,
    pub outputs: Vec<Container>,
    pub event_states: Vec<BTreeMap<String, f64>>,
}

impl SimResult {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Recorded outputs carry measurement noise when `noise` is given, the
    /// way a real sensor read at the save time would.
    fn push<M: Model + ?Sized>(
        &mut self,
        model: &M,
        t: f64,
        u: &Container,
        x: &Container,
        noise: Option<&mut StdRng>,
    ) -> Result<(), ProgError> {
        self.times.push(t);
        self.inputs.push(u.clone());
        self.states.push(x.clone());
        let z = model.output(x);
        self.outputs.push(match noise {
            Some(rng) => model.apply_measurement_noise(z, rng),
            None => z,
        });
        self.event_states.push(model.event_state_of(x)?);
        Ok(())
    }
}

/// What a simulation run produced: the saved trace plus where it stopped.
#[derive(Debug, Clone)]
pub struct SimOutcome {
    pub result: SimResult,
    pub final_time: f64,
    pub final_state: Container,
    /// Monitored events whose thresholds were met at the stop point. Empty
    /// when the run ended on time rather than on an event.
    pub events_met: Vec<String>,
}

/// Simulates `model` from `t0` until a monitored event's threshold is met
/// or `t_end` is reached.
///
/// `x0` overrides the model's `initialize` when given (predictors pass each
/// realization here). The reported event time does not overshoot: once a
/// step crosses a threshold, the crossing is refined by bisecting the final
/// step from the last pre-crossing state.
///
/// Errors are configuration errors only: unknown monitored events, a
/// non-positive step size, or a model with neither `dx` nor `next_state`.
/// A panicking load profile or model method propagates to the caller.
pub fn simulate_to_threshold<M, L>(
    model: &M,
    load: &L,
    cfg: &SimConfig,
    t0: f64,
    t_end: f64,
    x0: Option<&Container>,
) -> Result<SimOutcome, ProgError>
where
    M: Model + ?Sized,
    L: LoadProfile + ?Sized,
{
    let monitored: Vec<String> = match &cfg.events {
        Some(events) => {
            for e in events {
                if !model.events().contains(e) {
                    return Err(ProgError::UnknownEvent(e.clone()));
                }
            }
            events.clone()
        }
        None => model.events().to_vec(),
    };

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let dense = cfg.save_freq.is_none() && cfg.save_pts.is_empty();
    let mut save_pts: Vec<f64> = cfg.save_pts.iter().copied().filter(|p| *p > t0).collect();
    save_pts.sort_by(|a, b| a.partial_cmp(b).expect("save points must not be NaN"));
    let mut next_pt = 0usize;
    let mut next_save = cfg.save_freq.map(|f| t0 + f);

    let mut t = t0;
    let mut u = load.load(t, x0);
    let mut x = match x0 {
        Some(x0) => x0.clone(),
        None => model.initialize(Some(&u), None),
    };

    let mut result = SimResult::default();
    result.push(model, t, &u, &x, cfg.apply_noise.then_some(&mut rng))?;

    // Threshold already met at the starting state: report it, do not step.
    let met_at_start = met_events(model, &x, &monitored)?;
    if !met_at_start.is_empty() {
        return Ok(SimOutcome {
            final_time: t,
            final_state: x,
            events_met: met_at_start,
            result,
        });
    }

    while t < t_end {
        u = load.load(t, Some(&x));

        let mut dt = cfg.step.base(t, &x);
        if dt <= 0.0 || !dt.is_finite() {
            return Err(ProgError::InvalidStepSize(dt));
        }
        // Never overshoot the end time; in Auto mode, also land exactly on
        // the next requested save point.
        dt = dt.min(t_end - t);
        if matches!(cfg.step, StepPolicy::Auto { .. }) {
            if let Some(ns) = next_save {
                if ns > t {
                    dt = dt.min(ns - t);
                }
            }
            if let Some(pt) = save_pts.get(next_pt) {
                if *pt > t {
                    dt = dt.min(*pt - t);
                }
            }
        }

        let x_prev = x.clone();
        let mut next = integrate(model, &x, &u, dt, cfg.integrator)?;
        if cfg.apply_noise {
            next = model.apply_process_noise(next, dt, &mut rng);
        }
        x = model.apply_limits(next);
        t += dt;

        let met = met_events(model, &x, &monitored)?;
        if !met.is_empty() {
            // Crossed during this step: bisect the step down to the
            // crossing so the recorded event time does not overshoot.
            let (t_cross, x_cross, met) =
                refine_crossing(model, &x_prev, &u, t - dt, dt, t, x, met, &monitored)?;
            result.push(model, t_cross, &u, &x_cross, cfg.apply_noise.then_some(&mut rng))?;
            return Ok(SimOutcome {
                final_time: t_cross,
                final_state: x_cross,
                events_met: met,
                result,
            });
        }

        let mut save = dense;
        if let Some(ns) = next_save {
            if t >= ns - CROSSING_TOL {
                save = true;
                next_save = Some(ns + cfg.save_freq.expect("freq present when next_save is"));
            }
        }
        while save_pts.get(next_pt).is_some_and(|pt| t >= *pt - CROSSING_TOL) {
            save = true;
            next_pt += 1;
        }
        if save {
            result.push(model, t, &u, &x, cfg.apply_noise.then_some(&mut rng))?;
        }
    }

    // Ended on time. Record the final point if the last save missed it.
    if result.times.last() != Some(&t) {
        result.push(model, t, &u, &x, cfg.apply_noise.then_some(&mut rng))?;
    }
    Ok(SimOutcome {
        final_time: t,
        final_state: x,
        events_met: Vec::new(),
        result,
    })
}

fn met_events<M: Model + ?Sized>(
    model: &M,
    x: &Container,
    monitored: &[String],
) -> Result<Vec<String>, ProgError> {
    if monitored.is_empty() {
        return Ok(Vec::new());
    }
    let tm = model.threshold_met_of(x)?;
    Ok(monitored
        .iter()
        .filter(|e| tm.get(*e).copied().unwrap_or(false))
        .cloned()
        .collect())
}

pub(crate) fn integrate<M: Model + ?Sized>(
    model: &M,
    x: &Container,
    u: &Container,
    dt: f64,
    integrator: Integrator,
) -> Result<Container, ProgError> {
    match integrator {
        Integrator::Euler => model.step_state(x, u, dt),
        Integrator::Rk4 => match model.dx(x, u) {
            Some(k1) => {
                let x2 = x.scaled_add(&k1, dt / 2.0);
                let k2 = model
                    .dx(&x2, u)
                    .ok_or_else(|| ProgError::MissingTransition(model.name().to_string()))?;
                let x3 = x.scaled_add(&k2, dt / 2.0);
                let k3 = model
                    .dx(&x3, u)
                    .ok_or_else(|| ProgError::MissingTransition(model.name().to_string()))?;
                let x4 = x.scaled_add(&k3, dt);
                let k4 = model
                    .dx(&x4, u)
                    .ok_or_else(|| ProgError::MissingTransition(model.name().to_string()))?;
                let mut slope = k1;
                {
                    let v = slope.vector_mut();
                    *v += 2.0 * k2.vector() + 2.0 * k3.vector() + k4.vector();
                    *v /= 6.0;
                }
                Ok(x.scaled_add(&slope, dt))
            }
            // Discrete model: RK4 has no derivative to work with.
            None => model.step_state(x, u, dt),
        },
    }
}

/// Bisects the final step between the last pre-crossing state and the
/// overshoot, re-integrating (noiselessly) from `x_prev` with trial step
/// sizes until the crossing window is tight. Events crossing within the
/// same window share the reported crossing time.
#[allow(clippy::too_many_arguments)]
fn refine_crossing<M: Model + ?Sized>(
    model: &M,
    x_prev: &Container,
    u: &Container,
    t_prev: f64,
    dt: f64,
    t_hi: f64,
    x_hi: Container,
    met_hi: Vec<String>,
    monitored: &[String],
) -> Result<(f64, Container, Vec<String>), ProgError> {
    let mut lo = 0.0_f64;
    let mut hi = dt;
    let mut best = (t_hi, x_hi, met_hi);
    while hi - lo > CROSSING_TOL * dt.max(1.0) {
        let mid = 0.5 * (lo + hi);
        let x_mid = model.apply_limits(integrate(model, x_prev, u, mid, Integrator::Euler)?);
        let met = met_events(model, &x_mid, monitored)?;
        if met.is_empty() {
            lo = mid;
        } else {
            hi = mid;
            best = (t_prev + mid, x_mid, met);
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThrownObject;

    #[test]
    fn dt_must_be_positive() {
        let m = ThrownObject::new();
        let cfg = SimConfig {
            step: StepPolicy::Fixed(0.0),
            ..SimConfig::default()
        };
        let err = simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 10.0, None);
        assert!(matches!(err, Err(ProgError::InvalidStepSize(_))));
    }

    #[test]
    fn unknown_monitored_event_is_rejected() {
        let m = ThrownObject::new();
        let cfg = SimConfig {
            events: Some(vec!["explosion".to_string()]),
            ..SimConfig::default()
        };
        let err = simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 10.0, None);
        assert!(matches!(err, Err(ProgError::UnknownEvent(_))));
    }
}
