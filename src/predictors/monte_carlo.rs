use std::collections::BTreeMap;

use na::DVector;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::container::{Container, Schema};
use crate::errors::ProgError;
use crate::loading::LoadProfile;
use crate::model::Model;
use crate::simulation::{simulate_to_threshold, SimConfig};
use crate::uncertain::{UncertainData, UnweightedSamples};

use super::{EventStrategy, PredictConfig, Prediction, PredictionResult, Predictor};

/// Grid-alignment tolerance when matching recorded times to save times.
const GRID_TOL: f64 = 1e-9;

/// Monte Carlo prediction: draw realizations from the state belief and
/// simulate each one forward, with process noise, until its monitored
/// events occur or the horizon is reached.
///
/// Every aggregate (state, output, event state, time of event) comes back
/// as [`UnweightedSamples`], one entry per realization. A realization whose
/// event never crossed within the horizon contributes NaN to that event's
/// time-of-event distribution.
pub struct MonteCarloPredictor<'a, M: Model + ?Sized> {
    model: &'a M,
}

impl<'a, M: Model + ?Sized> MonteCarloPredictor<'a, M> {
    pub fn new(model: &'a M) -> Self {
        MonteCarloPredictor { model }
    }
}

/// One realization's full trace, concatenated across event-chasing
/// continuation segments.
#[derive(Default)]
struct Trace {
    times: Vec<f64>,
    inputs: Vec<DVector<f64>>,
    states: Vec<DVector<f64>>,
    outputs: Vec<DVector<f64>>,
    event_states: Vec<DVector<f64>>,
}

impl Trace {
    fn extend(
        &mut self,
        event_schema: &Schema,
        times: Vec<f64>,
        inputs: Vec<Container>,
        states: Vec<Container>,
        outputs: Vec<Container>,
        event_states: Vec<BTreeMap<String, f64>>,
    ) {
        self.times.extend(times);
        self.inputs
            .extend(inputs.into_iter().map(Container::into_vector));
        self.states
            .extend(states.into_iter().map(Container::into_vector));
        self.outputs
            .extend(outputs.into_iter().map(Container::into_vector));
        for es in event_states {
            self.event_states.push(DVector::from_iterator(
                event_schema.len(),
                event_schema.keys().iter().map(|k| es[k]),
            ));
        }
    }

    /// Index of the record covering grid time `g`: the first record at or
    /// after `g`, or the final record when the trace ended early (the last
    /// state is held).
    fn index_at(&self, g: f64) -> usize {
        self.times
            .iter()
            .position(|&t| t >= g - GRID_TOL)
            .unwrap_or(self.times.len() - 1)
    }
}

impl<M: Model + ?Sized> Predictor for MonteCarloPredictor<'_, M> {
    fn predict<L: LoadProfile + ?Sized>(
        &self,
        state: &UncertainData,
        load: &L,
        cfg: &PredictConfig,
    ) -> Result<PredictionResult, ProgError> {
        if cfg.const_load {
            let frozen = load.load(cfg.t0, None);
            let hold = move |_t: f64, _x: Option<&Container>| frozen.clone();
            return self.run(state, &hold, cfg);
        }
        self.run(state, load, cfg)
    }
}

impl<M: Model + ?Sized> MonteCarloPredictor<'_, M> {
    fn run<L: LoadProfile + ?Sized>(
        &self,
        state: &UncertainData,
        load: &L,
        cfg: &PredictConfig,
    ) -> Result<PredictionResult, ProgError> {
        let horizon = cfg.checked_horizon()?;
        let t_end = cfg.t0 + horizon;
        if state.schema() != self.model.states() {
            return Err(ProgError::DimensionMismatch {
                expected: self.model.states().len(),
                got: state.schema().len(),
            });
        }

        let monitored: Vec<String> = match &cfg.events {
            Some(events) => {
                for e in events {
                    if !self.model.events().contains(e) {
                        return Err(ProgError::UnknownEvent(e.clone()));
                    }
                }
                events.clone()
            }
            None => self.model.events().to_vec(),
        };
        let toe_schema = Schema::new(monitored.iter().map(String::as_str));
        let event_schema = Schema::new(self.model.events().iter().map(String::as_str));

        let n = cfg.n_samples.unwrap_or(match state {
            UncertainData::Samples(s) => s.len(),
            _ => 100,
        });
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let realizations = state.sample(n, &mut rng)?;

        let grid = cfg.save_grid();
        let mut traces = Vec::with_capacity(n);
        let mut toe_rows = Vec::with_capacity(n);
        let mut sim_cfg = SimConfig {
            step: cfg.step.clone(),
            integrator: cfg.integrator,
            save_freq: None,
            save_pts: grid.clone(),
            events: None,
            apply_noise: true,
            seed: None,
        };

        for (i, x0) in realizations.iter().enumerate() {
            sim_cfg.seed = cfg.seed.map(|s| s.wrapping_add(1 + i as u64));
            let mut trace = Trace::default();
            let mut toe = DVector::from_element(toe_schema.len(), f64::NAN);

            let mut remaining = monitored.clone();
            let mut t = cfg.t0;
            let mut x = Container::new(self.model.states().clone(), x0.clone())?;
            loop {
                sim_cfg.events = Some(remaining.clone());
                let outcome =
                    simulate_to_threshold(self.model, load, &sim_cfg, t, t_end, Some(&x))?;
                let r = outcome.result;
                trace.extend(
                    &event_schema,
                    r.times,
                    r.inputs,
                    r.states,
                    r.outputs,
                    r.event_states,
                );

                for e in &outcome.events_met {
                    if let Some(j) = toe_schema.index_of(e) {
                        toe[j] = outcome.final_time;
                    }
                    remaining.retain(|r| r != e);
                }

                let done = outcome.events_met.is_empty()
                    || remaining.is_empty()
                    || cfg.event_strategy == EventStrategy::First
                    || outcome.final_time >= t_end - GRID_TOL;
                if done {
                    break;
                }
                // Keep chasing the remaining events from where this
                // segment stopped.
                t = outcome.final_time;
                x = outcome.final_state;
            }

            traces.push(trace);
            toe_rows.push(toe);
        }

        let gather = |pick: fn(&Trace) -> &Vec<DVector<f64>>, schema: Schema| {
            let snapshots = grid
                .iter()
                .map(|&g| {
                    let rows = traces
                        .iter()
                        .map(|tr| pick(tr)[tr.index_at(g)].clone())
                        .collect();
                    UnweightedSamples::new(schema.clone(), rows).into()
                })
                .collect();
            Prediction::new(grid.clone(), snapshots)
        };

        Ok(PredictionResult {
            times: grid.clone(),
            inputs: gather(|tr| &tr.inputs, self.model.inputs().clone()),
            states: gather(|tr| &tr.states, self.model.states().clone()),
            outputs: gather(|tr| &tr.outputs, self.model.outputs().clone()),
            event_states: gather(|tr| &tr.event_states, event_schema),
            time_of_event: UnweightedSamples::new(toe_schema, toe_rows).into(),
        })
    }
}
