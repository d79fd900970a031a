//! Full prognostic loop on recorded data: track the state with an
//! unscented Kalman filter while the object flies, predict the impact time
//! after each batch of measurements, and grade the prediction profile at
//! the end.

use std::collections::BTreeMap;

use prognos::models::ThrownObject;
use prognos::prelude::*;

fn main() {
    env_logger::init();

    let model = ThrownObject::new().with_measurement_noise(0.2);

    // Record a noisy flight to play back.
    let record_cfg = SimConfig {
        step: StepPolicy::Fixed(0.1),
        events: Some(vec!["impact".to_string()]),
        seed: Some(3),
        ..SimConfig::default()
    };
    let flight =
        simulate_to_threshold(&model, &model.no_load(), &record_cfg, 0.0, 20.0, None).unwrap();
    let impact_true = flight.final_time;
    println!("recorded flight: impact at {impact_true:.3} s");

    // Track it and re-predict after every second of data.
    let x0: UncertainData = ScalarData::new(model.initialize(None, None)).into();
    let mut ukf = UnscentedKalmanFilter::with_defaults(&model, &x0)
        .unwrap()
        .with_t0(0.0)
        .with_dt_max(0.02);
    let predictor = MonteCarloPredictor::new(&model);
    let mut profile = ToePredictionProfile::new();

    for (i, t) in flight.result.times.iter().enumerate().skip(1) {
        let z = &flight.result.outputs[i];
        let u = &flight.result.inputs[i];
        ukf.estimate(*t, u, z).unwrap();

        if (t - t.round()).abs() > 1e-6 {
            continue;
        }
        let cfg = PredictConfig {
            t0: *t,
            step: StepPolicy::Fixed(0.05),
            horizon: 20.0,
            n_samples: Some(100),
            events: Some(vec!["impact".to_string()]),
            event_strategy: EventStrategy::First,
            seed: Some(17 + i as u64),
            ..PredictConfig::default()
        };
        let predicted = predictor
            .predict(&ukf.current_estimate(), &model.no_load(), &cfg)
            .unwrap();
        let toe = predicted.time_of_event;
        println!(
            "  after {t:4.1} s: impact predicted at {:.3} s",
            toe.mean().get("impact").unwrap()
        );
        profile.add_prediction(*t, toe);
    }

    let ground_truth = BTreeMap::from([("impact".to_string(), impact_true)]);
    let cra = profile.cumulative_relative_accuracy(&ground_truth).unwrap();
    let in_spec = profile.alpha_lambda(&ground_truth, 0.5, 0.1, 0.8, 0).unwrap();
    println!("cumulative relative accuracy = {:.4}", cra["impact"]);
    println!("alpha-lambda (alpha = 0.1, beta = 0.8) met: {}", in_spec["impact"]);
}
