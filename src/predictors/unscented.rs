use na::{DMatrix, DVector};

use crate::container::{Container, Schema};
use crate::errors::ProgError;
use crate::loading::LoadProfile;
use crate::model::{Model, ModelExt};
use crate::sigma::{unscented_transform, MerweScaledSigmaPoints, SamplingMethod};
use crate::simulation::integrate;
use crate::uncertain::{MultivariateNormalDist, ScalarData, UncertainData};

use super::{EventStrategy, PredictConfig, Prediction, PredictionResult, Predictor};

const GRID_TOL: f64 = 1e-9;

/// Unscented-transform prediction: spread a sigma-point deck over the state
/// belief, propagate every point deterministically (no process noise), and
/// reconstruct Gaussian moments at each save time with the transform's
/// weights.
///
/// Each sigma point carries its own time of event per monitored event; the
/// time-of-event distribution is the transform of those times. When any
/// sigma point fails to reach an event within the horizon that event's
/// predicted mean is NaN (absent): a Gaussian cannot honestly summarize a
/// partially-unbounded outcome.
pub struct UnscentedTransformPredictor<'a, M: Model + ?Sized> {
    model: &'a M,
    sampling: Box<dyn SamplingMethod>,
}

impl<'a, M: Model + ?Sized> UnscentedTransformPredictor<'a, M> {
    /// Uses Merwe scaled sigma points with `alpha = 1`, `beta = 0`,
    /// `kappa = 3 - n`.
    pub fn new(model: &'a M) -> Self {
        let n = model.states().len();
        UnscentedTransformPredictor {
            model,
            sampling: Box::new(MerweScaledSigmaPoints::new(n, 1.0, 0.0, 3.0 - n as f64)),
        }
    }

    pub fn with_sampling(mut self, sampling: Box<dyn SamplingMethod>) -> Self {
        self.sampling = sampling;
        self
    }

    /// Transform of the current deck into a Gaussian over `schema`.
    fn moments(
        &self,
        columns: &[DVector<f64>],
        schema: Schema,
    ) -> Result<MultivariateNormalDist, ProgError> {
        let points = DMatrix::from_columns(columns);
        let (mean, cov) = unscented_transform(&points, self.sampling.weights_m(), self.sampling.weights_c());
        MultivariateNormalDist::new(schema, mean, cov)
    }

    fn snapshot(
        &self,
        deck: &[Container],
        event_schema: &Schema,
    ) -> Result<(UncertainData, UncertainData, UncertainData), ProgError> {
        let xs: Vec<DVector<f64>> = deck.iter().map(|x| x.vector().clone()).collect();
        let zs: Vec<DVector<f64>> = deck
            .iter()
            .map(|x| self.model.output(x).into_vector())
            .collect();
        let mut ess = Vec::with_capacity(deck.len());
        for x in deck {
            let es = self.model.event_state_of(x)?;
            ess.push(DVector::from_iterator(
                event_schema.len(),
                event_schema.keys().iter().map(|k| es[k]),
            ));
        }
        Ok((
            self.moments(&xs, self.model.states().clone())?.into(),
            self.moments(&zs, self.model.outputs().clone())?.into(),
            self.moments(&ess, event_schema.clone())?.into(),
        ))
    }
}

impl<M: Model + ?Sized> Predictor for UnscentedTransformPredictor<'_, M> {
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

impl<M: Model + ?Sized> UnscentedTransformPredictor<'_, M> {
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

        // Deck of sigma points over the current belief.
        let mean = state.mean().into_vector();
        let cov = state.cov();
        let points = self.sampling.sampling_states(&cov, &mean)?;
        let mut deck: Vec<Container> = points
            .column_iter()
            .map(|c| Container::new(self.model.states().clone(), c.into_owned()))
            .collect::<Result<_, _>>()?;
        let k = deck.len();

        // toe[event][point], NaN until the point crosses. With no monitored
        // events a point never finishes; only the horizon stops the loop.
        let mut toe = vec![DVector::from_element(k, f64::NAN); monitored.len()];
        let mut finished = vec![false; k];

        let grid = cfg.save_grid();
        let mut next_grid = 1usize; // grid[0] == t0, recorded below
        let mut states = Vec::with_capacity(grid.len());
        let mut outputs = Vec::with_capacity(grid.len());
        let mut event_states = Vec::with_capacity(grid.len());
        let mut inputs = Vec::with_capacity(grid.len());

        let record =
            |deck: &[Container], u: &Container, states: &mut Vec<UncertainData>, outputs: &mut Vec<UncertainData>, event_states: &mut Vec<UncertainData>, inputs: &mut Vec<UncertainData>| -> Result<(), ProgError> {
                let (xs, zs, ess) = self.snapshot(deck, &event_schema)?;
                states.push(xs);
                outputs.push(zs);
                event_states.push(ess);
                inputs.push(ScalarData::new(u.clone()).into());
                Ok(())
            };

        let mut t = cfg.t0;
        let mean_x = Container::new(self.model.states().clone(), mean.clone())?;
        let mut u = load.load(t, Some(&mean_x));
        record(&deck, &u, &mut states, &mut outputs, &mut event_states, &mut inputs)?;

        // Initial crossings count at t0.
        for (i, x) in deck.iter().enumerate() {
            let tm = self.model.threshold_met_of(x)?;
            for (j, e) in monitored.iter().enumerate() {
                if tm.get(e).copied().unwrap_or(false) {
                    toe[j][i] = t;
                }
            }
        }

        while t < t_end - GRID_TOL && !finished.iter().all(|d| *d) {
            let center = deck[0].clone();
            u = load.load(t, Some(&center));

            let mut dt = cfg.step.base(t, &center);
            if dt <= 0.0 || !dt.is_finite() {
                return Err(ProgError::InvalidStepSize(dt));
            }
            dt = dt.min(t_end - t);
            if let Some(g) = grid.get(next_grid) {
                if *g > t {
                    dt = dt.min(*g - t);
                }
            }

            for (i, x) in deck.iter_mut().enumerate() {
                if finished[i] {
                    continue; // frozen at its crossing state
                }
                let next = integrate(self.model, x, &u, dt, cfg.integrator)?;
                *x = self.model.apply_limits(next);
            }
            t += dt;

            if !monitored.is_empty() {
                for (i, x) in deck.iter().enumerate() {
                    if finished[i] {
                        continue;
                    }
                    let tm = self.model.threshold_met_of(x)?;
                    let mut met_count = 0usize;
                    let mut any_new = false;
                    for (j, e) in monitored.iter().enumerate() {
                        if tm.get(e).copied().unwrap_or(false) {
                            if toe[j][i].is_nan() {
                                toe[j][i] = t;
                                any_new = true;
                            }
                            met_count += 1;
                        }
                    }
                    finished[i] = match cfg.event_strategy {
                        EventStrategy::First => any_new || toe.iter().any(|ev| !ev[i].is_nan()),
                        EventStrategy::All => met_count == monitored.len(),
                    };
                }
            }

            if grid.get(next_grid).is_some_and(|g| t >= *g - GRID_TOL) {
                record(&deck, &u, &mut states, &mut outputs, &mut event_states, &mut inputs)?;
                next_grid += 1;
            }
        }

        // All points crossed before the horizon: hold the frozen deck for
        // the remaining save times.
        while next_grid < grid.len() {
            record(&deck, &u, &mut states, &mut outputs, &mut event_states, &mut inputs)?;
            next_grid += 1;
        }

        // Transform of the per-point crossing times. An event some point
        // never reached reports a NaN mean and no spread.
        let ne = monitored.len();
        let mut toe_mean = DVector::from_element(ne, f64::NAN);
        let mut toe_cov = DMatrix::zeros(ne, ne);
        let complete: Vec<usize> = (0..ne)
            .filter(|&j| toe[j].iter().all(|v| !v.is_nan()))
            .collect();
        if !complete.is_empty() {
            let rows: Vec<DVector<f64>> = (0..k)
                .map(|i| DVector::from_iterator(complete.len(), complete.iter().map(|&j| toe[j][i])))
                .collect();
            let (m, c) = unscented_transform(
                &DMatrix::from_columns(&rows),
                self.sampling.weights_m(),
                self.sampling.weights_c(),
            );
            for (a, &j) in complete.iter().enumerate() {
                toe_mean[j] = m[a];
                for (b, &jj) in complete.iter().enumerate() {
                    toe_cov[(j, jj)] = c[(a, b)];
                }
            }
        }
        if complete.len() < ne {
            log::warn!(
                "some sigma points never reached {} of {} events within the horizon; their predicted time of event is absent",
                ne - complete.len(),
                ne
            );
        }
        let time_of_event = MultivariateNormalDist::new(toe_schema, toe_mean, toe_cov)?.into();

        Ok(PredictionResult {
            times: grid.clone(),
            inputs: Prediction::new(grid.clone(), inputs),
            states: Prediction::new(grid.clone(), states),
            outputs: Prediction::new(grid.clone(), outputs),
            event_states: Prediction::new(grid.clone(), event_states),
            time_of_event,
        })
    }
}
