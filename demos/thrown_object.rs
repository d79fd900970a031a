//! Throw an object up, simulate it to impact, then predict the impact time
//! from an uncertain initial state.

use prognos::metrics::prob_success;
use prognos::models::ThrownObject;
use prognos::prelude::*;

fn main() {
    env_logger::init();

    let model = ThrownObject::new();

    // Simulate until the object hits the ground.
    let cfg = SimConfig {
        step: StepPolicy::Fixed(0.01),
        integrator: Integrator::Rk4,
        save_freq: Some(1.0),
        events: Some(vec!["impact".to_string()]),
        ..SimConfig::default()
    };
    let outcome =
        simulate_to_threshold(&model, &model.no_load(), &cfg, 0.0, 20.0, None).unwrap();
    println!("impact at t = {:.3} s", outcome.final_time);
    for (t, es) in outcome.result.times.iter().zip(&outcome.result.event_states) {
        println!("  t = {t:5.2}  falling = {:.3}  impact = {:.3}", es["falling"], es["impact"]);
    }

    // Predict the same event from an uncertain start, with process noise.
    let noisy = ThrownObject::new().with_process_noise(0.05, 0.3);
    let std = Container::from_pairs(noisy.states().clone(), [("x", 0.1), ("v", 0.5)]).unwrap();
    let x0: UncertainData = MultivariateNormalDist::from_means_and_stds(
        noisy.states().clone(),
        &noisy.initialize(None, None),
        &std,
    )
    .unwrap()
    .into();

    let predict_cfg = PredictConfig {
        step: StepPolicy::Fixed(0.01),
        horizon: 20.0,
        save_freq: Some(2.0),
        n_samples: Some(200),
        events: Some(vec!["impact".to_string()]),
        event_strategy: EventStrategy::First,
        seed: Some(7),
        ..PredictConfig::default()
    };
    let predicted = MonteCarloPredictor::new(&noisy)
        .predict(&x0, &noisy.no_load(), &predict_cfg)
        .unwrap();

    let toe = &predicted.time_of_event;
    println!(
        "predicted impact: mean = {:.3} s, std = {:.3} s",
        toe.mean().get("impact").unwrap(),
        toe.cov()[(0, 0)].sqrt()
    );
    for mission_end in [7.0, 8.0, 9.0] {
        let ps = prob_success(toe, mission_end, 0).unwrap();
        println!("  P(survives to {mission_end} s) = {:.2}", ps["impact"]);
    }
}
