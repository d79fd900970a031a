#[cfg(test)]
mod tests {
    use crate::container::Container;
    use crate::model::Model;
    use crate::models::ThrownObject;
    use crate::simulation::{simulate_to_threshold, Integrator, SimConfig, StepPolicy};

    fn free_fall_from(height: f64) -> ThrownObject {
        let mut m = ThrownObject::new();
        let params = m.parameters_mut().unwrap();
        params.set("thrower_height", height);
        params.set("throwing_speed", 0.0);
        m
    }

    #[test]
    fn free_fall_impact_time_matches_closed_form() {
        // Dropped from 10 m: impact at sqrt(2 * 10 / 9.81) = 1.4278 s.
        let m = free_fall_from(10.0);
        let cfg = SimConfig {
            step: StepPolicy::Fixed(0.01),
            integrator: Integrator::Rk4,
            events: Some(vec!["impact".to_string()]),
            ..SimConfig::default()
        };
        let out = simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 10.0, None).unwrap();
        assert_eq!(out.events_met, vec!["impact".to_string()]);
        assert!((out.final_time - 1.4278).abs() < 2e-3, "t = {}", out.final_time);
        assert!(out.final_state.get("x").unwrap().abs() < 1e-3);
    }

    #[test]
    fn full_throw_hits_the_ground_after_the_apex() {
        // h = 1.83, v0 = 40: apex at 4.0775 s, impact at 8.2004 s.
        let m = ThrownObject::new();
        let cfg = SimConfig {
            step: StepPolicy::Fixed(0.01),
            integrator: Integrator::Rk4,
            events: Some(vec!["impact".to_string()]),
            ..SimConfig::default()
        };
        let out = simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 20.0, None).unwrap();
        assert!((out.final_time - 8.2004).abs() < 2e-2, "t = {}", out.final_time);

        let cfg = SimConfig {
            step: StepPolicy::Fixed(0.01),
            events: Some(vec!["falling".to_string()]),
            ..SimConfig::default()
        };
        let out = simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 20.0, None).unwrap();
        assert_eq!(out.events_met, vec!["falling".to_string()]);
        assert!((out.final_time - 40.0 / 9.81).abs() < 2e-2);
    }

    #[test]
    fn halving_dt_halves_euler_error() {
        let m = free_fall_from(10.0);
        let truth = 10.0 - 0.5 * 9.81; // x(1)
        let run = |dt: f64| {
            let cfg = SimConfig {
                step: StepPolicy::Fixed(dt),
                events: Some(Vec::new()),
                ..SimConfig::default()
            };
            let out = simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 1.0, None).unwrap();
            (out.final_state.get("x").unwrap() - truth).abs()
        };
        let coarse = run(0.1);
        let fine = run(0.05);
        assert!(fine < coarse);
        // First-order scheme: half the step, about half the error.
        assert!((fine / coarse - 0.5).abs() < 0.1);
    }

    #[test]
    fn save_freq_records_on_the_requested_grid() {
        let m = free_fall_from(100.0);
        let cfg = SimConfig {
            step: StepPolicy::Fixed(0.1),
            save_freq: Some(0.5),
            events: Some(Vec::new()),
            ..SimConfig::default()
        };
        let out = simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 2.0, None).unwrap();
        assert_eq!(out.result.times.len(), 5);
        for (recorded, expected) in out.result.times.iter().zip([0.0, 0.5, 1.0, 1.5, 2.0]) {
            assert!((recorded - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn recorded_outputs_carry_measurement_noise() {
        let m = ThrownObject::new().with_measurement_noise(0.5);
        let cfg = SimConfig {
            step: StepPolicy::Fixed(0.1),
            save_freq: Some(0.5),
            events: Some(Vec::new()),
            seed: Some(9),
            ..SimConfig::default()
        };
        let out = simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 2.0, None).unwrap();
        // Recorded outputs are sensor reads, not the exact output function.
        let noisy = out
            .result
            .states
            .iter()
            .zip(&out.result.outputs)
            .any(|(x, z)| (m.output(x).get("x").unwrap() - z.get("x").unwrap()).abs() > 1e-9);
        assert!(noisy);

        let quiet = SimConfig {
            apply_noise: false,
            ..cfg
        };
        let out = simulate_to_threshold(&m, &m.no_load(), &quiet, 0.0, 2.0, None).unwrap();
        for (x, z) in out.result.states.iter().zip(&out.result.outputs) {
            assert_eq!(m.output(x).get("x"), z.get("x"));
        }
    }

    #[test]
    fn threshold_met_at_start_does_not_step() {
        let m = ThrownObject::new();
        let grounded =
            Container::from_pairs(m.states().clone(), [("x", 0.0), ("v", -1.0)]).unwrap();
        let cfg = SimConfig::default();
        let out =
            simulate_to_threshold(&m, &m.no_load(), &cfg, 0.0, 10.0, Some(&grounded)).unwrap();
        assert_eq!(out.final_time, 0.0);
        assert_eq!(out.result.times.len(), 1);
        assert!(out.events_met.contains(&"impact".to_string()));
    }
}
