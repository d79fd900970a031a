#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use na::{DMatrix, DVector};

    use crate::metrics::prob_success;
    use crate::model::Model;
    use crate::models::ThrownObject;
    use crate::predictors::{
        EventStrategy, MonteCarloPredictor, PredictConfig, Predictor, UnscentedTransformPredictor,
    };
    use crate::simulation::{simulate_to_threshold, Integrator, SimConfig, StepPolicy};
    use crate::uncertain::{MultivariateNormalDist, ScalarData, UncertainData};

    fn impact_cfg(horizon: f64) -> PredictConfig {
        PredictConfig {
            step: StepPolicy::Fixed(0.01),
            horizon,
            save_freq: Some(1.0),
            events: Some(vec!["impact".to_string()]),
            event_strategy: EventStrategy::First,
            seed: Some(42),
            ..PredictConfig::default()
        }
    }

    #[test]
    fn single_noiseless_realization_reproduces_the_simulation() {
        let m = ThrownObject::new();
        let x0: UncertainData = ScalarData::new(m.initialize(None, None)).into();

        let mut cfg = impact_cfg(12.0);
        cfg.n_samples = Some(1);
        let predicted = MonteCarloPredictor::new(&m).predict(&x0, &m.no_load(), &cfg).unwrap();

        let sim_cfg = SimConfig {
            step: StepPolicy::Fixed(0.01),
            events: Some(vec!["impact".to_string()]),
            ..SimConfig::default()
        };
        let direct =
            simulate_to_threshold(&m, &m.no_load(), &sim_cfg, 0.0, 12.0, None).unwrap();

        let toe = predicted.time_of_event.mean();
        assert_abs_diff_eq!(toe.get("impact").unwrap(), direct.final_time, epsilon = 1e-9);
    }

    #[test]
    fn monte_carlo_with_noise_spreads_the_time_of_event() {
        let m = ThrownObject::new().with_process_noise(0.0, 0.5);
        let x0: UncertainData = ScalarData::new(m.initialize(None, None)).into();

        let mut cfg = impact_cfg(20.0);
        cfg.n_samples = Some(50);
        let predicted = MonteCarloPredictor::new(&m).predict(&x0, &m.no_load(), &cfg).unwrap();

        let toe = &predicted.time_of_event;
        assert_abs_diff_eq!(toe.mean().get("impact").unwrap(), 8.2, epsilon = 0.5);
        assert!(toe.cov()[(0, 0)] > 0.0);

        // Every realization still hits the ground well before 20 s.
        let ps = prob_success(toe, 15.0, 0).unwrap();
        assert_eq!(ps["impact"], 0.0);
    }

    #[test]
    fn event_beyond_the_horizon_is_reported_absent() {
        let m = ThrownObject::new();
        let x0: UncertainData = ScalarData::new(m.initialize(None, None)).into();

        // Impact happens near 8.2 s; a 5 s horizon cannot see it.
        let mut cfg = impact_cfg(5.0);
        cfg.n_samples = Some(3);
        let predicted = MonteCarloPredictor::new(&m).predict(&x0, &m.no_load(), &cfg).unwrap();

        assert!(predicted.time_of_event.mean().get("impact").unwrap().is_nan());
        let ps = prob_success(&predicted.time_of_event, 4.0, 0).unwrap();
        assert_eq!(ps["impact"], 1.0);
    }

    #[test]
    fn unscented_transform_predicts_the_impact_time() {
        let m = ThrownObject::new();
        let x0: UncertainData = MultivariateNormalDist::new(
            m.states().clone(),
            m.initialize(None, None).into_vector(),
            DMatrix::from_diagonal(&DVector::from_row_slice(&[1e-4, 1e-4])),
        )
        .unwrap()
        .into();

        let cfg = impact_cfg(12.0);
        let predicted =
            UnscentedTransformPredictor::new(&m).predict(&x0, &m.no_load(), &cfg).unwrap();

        let toe = predicted.time_of_event.mean();
        assert_abs_diff_eq!(toe.get("impact").unwrap(), 8.2004, epsilon = 0.05);

        // Snapshots cover the whole save grid, ending at the horizon.
        assert_eq!(predicted.times.first(), Some(&0.0));
        assert_eq!(predicted.times.last(), Some(&12.0));
        assert_eq!(predicted.states.len(), predicted.times.len());
    }

    #[test]
    fn unscented_transform_without_events_runs_to_the_horizon() {
        let m = ThrownObject::new();
        let x0: UncertainData = MultivariateNormalDist::new(
            m.states().clone(),
            m.initialize(None, None).into_vector(),
            DMatrix::from_diagonal(&DVector::from_row_slice(&[1e-4, 1e-4])),
        )
        .unwrap()
        .into();

        let mut cfg = impact_cfg(2.0);
        cfg.events = Some(vec![]);
        cfg.integrator = Integrator::Rk4;
        let predicted =
            UnscentedTransformPredictor::new(&m).predict(&x0, &m.no_load(), &cfg).unwrap();

        // Nothing to monitor, so the deck still flies the full horizon: the
        // final state snapshot is the ballistic position at t = 2, not the
        // launch state.
        let end = predicted.states.snapshots.last().unwrap().mean();
        let truth = 1.83 + 40.0 * 2.0 - 0.5 * 9.81 * 4.0;
        assert_abs_diff_eq!(end.get("x").unwrap(), truth, epsilon = 1e-6);
        assert_eq!(predicted.times.last(), Some(&2.0));
    }

    #[test]
    fn event_state_predictions_decay_toward_zero() {
        let m = ThrownObject::new();
        let x0: UncertainData = ScalarData::new(m.initialize(None, None)).into();

        let mut cfg = impact_cfg(8.0);
        cfg.n_samples = Some(5);
        let predicted = MonteCarloPredictor::new(&m).predict(&x0, &m.no_load(), &cfg).unwrap();

        // The falling event state starts at 1 (full throwing speed) and is
        // exhausted by the apex near 4.1 s.
        let es = &predicted.event_states;
        let first = es.snapshots.first().unwrap().mean();
        let last = es.snapshots.last().unwrap().mean();
        assert_abs_diff_eq!(first.get("falling").unwrap(), 1.0, epsilon = 1e-6);
        assert!(last.get("falling").unwrap().abs() < 1e-6);
    }
}
