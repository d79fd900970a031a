use std::collections::BTreeMap;

use na::{DMatrix, DVector};

use crate::container::{Container, Schema};
use crate::loading::{no_load, LoadProfile};
use crate::model::{LinearModel, Model, NoiseSpec, Parameters};

/// An object thrown straight up, watched until it hits the ground.
///
/// States are position `x` and velocity `v`, there are no inputs, and the
/// only measurement is the position. Two events: `falling` (the apex has
/// passed) and `impact` (the object has reached the ground).
pub struct ThrownObject {
    states: Schema,
    inputs: Schema,
    outputs: Schema,
    events: Vec<String>,
    parameters: Parameters,
    process_noise: NoiseSpec,
    measurement_noise: NoiseSpec,
}

impl ThrownObject {
    pub fn new() -> Self {
        ThrownObject {
            states: Schema::new(["x", "v"]),
            inputs: Schema::new(Vec::<String>::new()),
            outputs: Schema::new(["x"]),
            events: vec!["falling".to_string(), "impact".to_string()],
            parameters: Parameters::new([
                ("thrower_height", 1.83),
                ("throwing_speed", 40.0),
                ("g", -9.81),
            ]),
            process_noise: NoiseSpec::None,
            measurement_noise: NoiseSpec::None,
        }
    }

    pub fn with_process_noise(mut self, std_x: f64, std_v: f64) -> Self {
        let std = Container::from_pairs(self.states.clone(), [("x", std_x), ("v", std_v)])
            .expect("state keys");
        self.process_noise = NoiseSpec::Gaussian(std);
        self
    }

    pub fn with_measurement_noise(mut self, std_x: f64) -> Self {
        let std =
            Container::from_pairs(self.outputs.clone(), [("x", std_x)]).expect("output keys");
        self.measurement_noise = NoiseSpec::Gaussian(std);
        self
    }

    /// This model has no inputs.
    pub fn no_load(&self) -> impl LoadProfile {
        no_load(self.inputs.clone())
    }

    fn g(&self) -> f64 {
        self.parameters.get("g").unwrap_or(-9.81)
    }
}

impl Default for ThrownObject {
    fn default() -> Self {
        ThrownObject::new()
    }
}

impl Model for ThrownObject {
    fn name(&self) -> &str {
        "ThrownObject"
    }

    fn states(&self) -> &Schema {
        &self.states
    }

    fn inputs(&self) -> &Schema {
        &self.inputs
    }

    fn outputs(&self) -> &Schema {
        &self.outputs
    }

    fn events(&self) -> &[String] {
        &self.events
    }

    fn initialize(&self, _u: Option<&Container>, _z: Option<&Container>) -> Container {
        Container::from_pairs(
            self.states.clone(),
            [
                ("x", self.parameters.get("thrower_height").unwrap_or(1.83)),
                ("v", self.parameters.get("throwing_speed").unwrap_or(40.0)),
            ],
        )
        .expect("state keys")
    }

    fn dx(&self, x: &Container, _u: &Container) -> Option<Container> {
        let v = x.vector()[1];
        Some(
            Container::from_pairs(self.states.clone(), [("x", v), ("v", self.g())])
                .expect("state keys"),
        )
    }

    fn output(&self, x: &Container) -> Container {
        Container::from_pairs(self.outputs.clone(), [("x", x.vector()[0])])
            .expect("output keys")
    }

    fn event_state(&self, x: &Container) -> Option<BTreeMap<String, f64>> {
        let pos = x.vector()[0];
        let v = x.vector()[1];
        let speed = self.parameters.get("throwing_speed").unwrap_or(40.0);
        // 1 while still climbing; once falling, the fraction of the apex
        // height remaining. The apex it fell from is recoverable from the
        // current state: apex = pos + v^2 / (2|g|).
        let impact = if v > 0.0 {
            1.0
        } else {
            let apex = pos + v * v / (-2.0 * self.g());
            if apex > 0.0 {
                (pos / apex).max(0.0)
            } else {
                0.0
            }
        };
        Some(BTreeMap::from([
            ("falling".to_string(), (v / speed).max(0.0)),
            ("impact".to_string(), impact),
        ]))
    }

    fn threshold_met(&self, x: &Container) -> Option<BTreeMap<String, bool>> {
        let pos = x.vector()[0];
        let v = x.vector()[1];
        Some(BTreeMap::from([
            ("falling".to_string(), v < 0.0),
            ("impact".to_string(), pos <= 0.0),
        ]))
    }

    fn process_noise(&self) -> &NoiseSpec {
        &self.process_noise
    }

    fn measurement_noise(&self) -> &NoiseSpec {
        &self.measurement_noise
    }

    fn parameters(&self) -> Option<&Parameters> {
        Some(&self.parameters)
    }

    fn parameters_mut(&mut self) -> Option<&mut Parameters> {
        Some(&mut self.parameters)
    }
}

/// The thrown object expressed in linear form, for the Kalman filter:
/// `dx = A x + E`, `z = C x`.
pub struct LinearThrownObject {
    inner: ThrownObject,
}

impl LinearThrownObject {
    pub fn new() -> Self {
        LinearThrownObject {
            inner: ThrownObject::new(),
        }
    }

    pub fn no_load(&self) -> impl LoadProfile {
        self.inner.no_load()
    }
}

impl Default for LinearThrownObject {
    fn default() -> Self {
        LinearThrownObject::new()
    }
}

impl Model for LinearThrownObject {
    fn name(&self) -> &str {
        "LinearThrownObject"
    }

    fn states(&self) -> &Schema {
        self.inner.states()
    }

    fn inputs(&self) -> &Schema {
        self.inner.inputs()
    }

    fn outputs(&self) -> &Schema {
        self.inner.outputs()
    }

    fn events(&self) -> &[String] {
        self.inner.events()
    }

    fn initialize(&self, u: Option<&Container>, z: Option<&Container>) -> Container {
        self.inner.initialize(u, z)
    }

    fn dx(&self, x: &Container, u: &Container) -> Option<Container> {
        Some(crate::model::linear_dx(self, x, u))
    }

    fn output(&self, x: &Container) -> Container {
        crate::model::linear_output(self, x)
    }

    fn event_state(&self, x: &Container) -> Option<BTreeMap<String, f64>> {
        self.inner.event_state(x)
    }

    fn threshold_met(&self, x: &Container) -> Option<BTreeMap<String, bool>> {
        self.inner.threshold_met(x)
    }

    fn parameters(&self) -> Option<&Parameters> {
        self.inner.parameters()
    }

    fn parameters_mut(&mut self) -> Option<&mut Parameters> {
        self.inner.parameters_mut()
    }
}

impl LinearModel for LinearThrownObject {
    fn a(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0])
    }

    fn c(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, 2, &[1.0, 0.0])
    }

    fn e(&self) -> DVector<f64> {
        DVector::from_row_slice(&[0.0, self.inner.g()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelExt;

    #[test]
    fn event_states_start_healthy_and_reach_zero() {
        let m = ThrownObject::new();
        let x0 = m.initialize(None, None);
        let es = m.event_state_of(&x0).unwrap();
        assert!(es["falling"] > 0.99);
        // No impact progress at all while still climbing.
        assert_eq!(es["impact"], 1.0);

        // Halfway down from an apex of 40 m (v^2 = 2|g| * 20).
        let half = Container::from_pairs(
            m.states.clone(),
            [("x", 20.0), ("v", -(2.0_f64 * 9.81 * 20.0).sqrt())],
        )
        .unwrap();
        assert!((m.event_state_of(&half).unwrap()["impact"] - 0.5).abs() < 1e-12);

        let down = Container::from_pairs(m.states.clone(), [("x", 0.0), ("v", -30.0)]).unwrap();
        let tm = m.threshold_met_of(&down).unwrap();
        assert!(tm["falling"]);
        assert!(tm["impact"]);
        assert_eq!(m.event_state_of(&down).unwrap()["impact"], 0.0);
    }

    #[test]
    fn linear_form_matches_the_nonlinear_model() {
        let m = ThrownObject::new();
        let lm = LinearThrownObject::new();
        let x = Container::from_pairs(m.states.clone(), [("x", 5.0), ("v", 12.0)]).unwrap();
        let u = Container::zeros(m.inputs.clone());
        let dx = m.dx(&x, &u).unwrap();
        let ldx = lm.dx(&x, &u).unwrap();
        assert_eq!(dx.vector(), ldx.vector());
        assert_eq!(m.output(&x).vector(), lm.output(&x).vector());
    }
}
