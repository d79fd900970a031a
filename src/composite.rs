//! System-of-systems composition.
//!
//! A [`CompositeModel`] combines several models into one, wiring the state
//! or output of one submodel to the input of another. Every key of the
//! combined model is qualified as `submodel.key`, and the result satisfies
//! the same [`Model`] contract as its parts, so the engine, estimators and
//! predictors run a composite exactly like a single model.

use std::collections::{BTreeMap, BTreeSet};

use na::DVector;

use crate::container::{Container, Schema};
use crate::errors::ProgError;
use crate::model::{Model, ModelExt};

/// One named submodel plus its resolved wiring into the composite schemas.
struct Submodel {
    name: String,
    model: Box<dyn Model>,
    /// Composite state index of each own state, in the submodel's order.
    state_idx: Vec<usize>,
    /// Composite input index per input slot; `None` when wired internally.
    input_from_u: Vec<Option<usize>>,
    /// `(input slot, composite state index)` for each wired input.
    input_from_x: Vec<(usize, usize)>,
    /// `(output slot, composite state index)` for outputs that feed another
    /// submodel. The mirror state holds the output's last value between
    /// steps.
    output_mirrors: Vec<(usize, usize)>,
    /// Composite output index per output slot.
    output_idx: Vec<usize>,
}

/// Several models acting as one.
///
/// Connections are `(source, destination)` pairs of qualified keys: the
/// source is a submodel state or output, the destination a submodel input.
/// Wired inputs disappear from the composite's input schema; output sources
/// gain a mirror state so their last value persists between steps. Submodels
/// step in the order given, each seeing the values already written by its
/// predecessors within the same step.
pub struct CompositeModel {
    submodels: Vec<Submodel>,
    states: Schema,
    inputs: Schema,
    outputs: Schema,
    events: Vec<String>,
}

fn split_key(key: &str) -> Result<(&str, &str), ProgError> {
    key.split_once('.').ok_or_else(|| {
        ProgError::InvalidComposition(format!("key `{key}` must be of the form `submodel.key`"))
    })
}

impl CompositeModel {
    pub fn build(
        models: Vec<(String, Box<dyn Model>)>,
        connections: &[(String, String)],
    ) -> Result<Self, ProgError> {
        if models.len() < 2 {
            return Err(ProgError::InvalidComposition(
                "at least two submodels are required".to_string(),
            ));
        }
        let mut names = BTreeSet::new();
        for (name, _) in &models {
            if name.contains('.') {
                return Err(ProgError::InvalidComposition(format!(
                    "submodel name `{name}` must not contain `.`"
                )));
            }
            if !names.insert(name.clone()) {
                return Err(ProgError::InvalidComposition(format!(
                    "duplicate submodel name `{name}`"
                )));
            }
        }

        let mut state_keys: Vec<String> = Vec::new();
        for (name, m) in &models {
            for k in m.states().keys() {
                state_keys.push(format!("{name}.{k}"));
            }
        }

        // Per submodel: wired inputs and output mirrors, by key until the
        // composite schema is final.
        let mut from_x: Vec<Vec<(usize, String)>> = vec![Vec::new(); models.len()];
        let mut mirrors: Vec<Vec<(usize, String)>> = vec![Vec::new(); models.len()];
        let mut wired: BTreeSet<String> = BTreeSet::new();

        for (src, dst) in connections {
            let (dst_model, dst_key) = split_key(dst)?;
            let di = models
                .iter()
                .position(|(n, _)| n == dst_model)
                .ok_or_else(|| {
                    ProgError::InvalidComposition(format!("unknown submodel in `{dst}`"))
                })?;
            let dst_slot = models[di].1.inputs().index_of(dst_key).ok_or_else(|| {
                ProgError::InvalidComposition(format!("`{dst}` is not a submodel input"))
            })?;
            if !wired.insert(dst.clone()) {
                return Err(ProgError::InvalidComposition(format!(
                    "input `{dst}` is wired twice"
                )));
            }

            let (src_model, src_key) = split_key(src)?;
            if src_model == dst_model {
                return Err(ProgError::InvalidComposition(format!(
                    "`{src}` -> `{dst}` connects a submodel to itself"
                )));
            }
            let si = models
                .iter()
                .position(|(n, _)| n == src_model)
                .ok_or_else(|| {
                    ProgError::InvalidComposition(format!("unknown submodel in `{src}`"))
                })?;

            if state_keys.contains(src) {
                from_x[di].push((dst_slot, src.clone()));
            } else if let Some(slot) = models[si].1.outputs().index_of(src_key) {
                state_keys.push(src.clone());
                mirrors[si].push((slot, src.clone()));
                from_x[di].push((dst_slot, src.clone()));
            } else {
                return Err(ProgError::InvalidComposition(format!(
                    "source `{src}` is neither a submodel state nor output"
                )));
            }
        }

        let mut input_keys: Vec<String> = Vec::new();
        let mut output_keys: Vec<String> = Vec::new();
        let mut events: Vec<String> = Vec::new();
        for (name, m) in &models {
            for k in m.inputs().keys() {
                let q = format!("{name}.{k}");
                if !wired.contains(&q) {
                    input_keys.push(q);
                }
            }
            for k in m.outputs().keys() {
                output_keys.push(format!("{name}.{k}"));
            }
            for e in m.events() {
                events.push(format!("{name}.{e}"));
            }
        }

        let states = Schema::new(state_keys);
        let inputs = Schema::new(input_keys);
        let outputs = Schema::new(output_keys);

        let submodels = models
            .into_iter()
            .enumerate()
            .map(|(i, (name, model))| {
                let resolve = |key: &String| {
                    states.index_of(key).expect("key inserted during wiring")
                };
                let state_idx = model
                    .states()
                    .keys()
                    .iter()
                    .map(|k| resolve(&format!("{name}.{k}")))
                    .collect();
                let input_from_u = model
                    .inputs()
                    .keys()
                    .iter()
                    .map(|k| inputs.index_of(&format!("{name}.{k}")))
                    .collect();
                let input_from_x = from_x[i]
                    .iter()
                    .map(|(slot, key)| (*slot, resolve(key)))
                    .collect();
                let output_mirrors = mirrors[i]
                    .iter()
                    .map(|(slot, key)| (*slot, resolve(key)))
                    .collect();
                let output_idx = model
                    .outputs()
                    .keys()
                    .iter()
                    .map(|k| {
                        outputs
                            .index_of(&format!("{name}.{k}"))
                            .expect("every submodel output is a composite output")
                    })
                    .collect();
                Submodel {
                    name,
                    model,
                    state_idx,
                    input_from_u,
                    input_from_x,
                    output_mirrors,
                    output_idx,
                }
            })
            .collect();

        Ok(CompositeModel {
            submodels,
            states,
            inputs,
            outputs,
            events,
        })
    }

    /// The submodel's own state, extracted from the composite state.
    fn sub_state(&self, sub: &Submodel, x: &Container) -> Container {
        let v = DVector::from_iterator(
            sub.state_idx.len(),
            sub.state_idx.iter().map(|&i| x.vector()[i]),
        );
        Container::new(sub.model.states().clone(), v).expect("lengths match")
    }
}

/// A submodel-schema view of a qualified composite container. Keys the
/// composite does not carry are NaN; `None` when it carries none of them.
fn sliced(src: Option<&Container>, name: &str, schema: &Schema) -> Option<Container> {
    let src = src?;
    let mut values = DVector::from_element(schema.len(), f64::NAN);
    let mut any = false;
    for (j, key) in schema.keys().iter().enumerate() {
        if let Some(v) = src.get(&format!("{name}.{key}")) {
            values[j] = v;
            any = true;
        }
    }
    any.then(|| Container::new(schema.clone(), values).expect("lengths match"))
}

impl Model for CompositeModel {
    fn name(&self) -> &str {
        "CompositeModel"
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

    fn initialize(&self, u: Option<&Container>, z: Option<&Container>) -> Container {
        let mut values = DVector::from_element(self.states.len(), f64::NAN);
        for sub in &self.submodels {
            let u_i = sliced(u, &sub.name, sub.model.inputs());
            let z_i = sliced(z, &sub.name, sub.model.outputs());
            let x_i = sub.model.initialize(u_i.as_ref(), z_i.as_ref());
            for (j, &gi) in sub.state_idx.iter().enumerate() {
                values[gi] = x_i.vector()[j];
            }
            if !sub.output_mirrors.is_empty() {
                let z_full = sub.model.output(&x_i);
                for &(slot, gi) in &sub.output_mirrors {
                    values[gi] = z_full.vector()[slot];
                }
            }
        }
        Container::new(self.states.clone(), values).expect("lengths match")
    }

    fn next_state(&self, x: &Container, u: &Container, dt: f64) -> Option<Container> {
        let mut work = x.clone();
        for sub in &self.submodels {
            let mut u_i = Container::zeros(sub.model.inputs().clone());
            for (slot, src) in sub.input_from_u.iter().enumerate() {
                if let Some(gi) = src {
                    u_i.vector_mut()[slot] = u.vector()[*gi];
                }
            }
            for &(slot, gi) in &sub.input_from_x {
                u_i.vector_mut()[slot] = work.vector()[gi];
            }

            let x_i = self.sub_state(sub, &work);
            let next = sub.model.next_state(&x_i, &u_i, dt)?;
            for (j, &gi) in sub.state_idx.iter().enumerate() {
                work.vector_mut()[gi] = next.vector()[j];
            }
            if !sub.output_mirrors.is_empty() {
                let z_i = sub.model.output(&next);
                for &(slot, gi) in &sub.output_mirrors {
                    work.vector_mut()[gi] = z_i.vector()[slot];
                }
            }
        }
        Some(work)
    }

    fn output(&self, x: &Container) -> Container {
        let mut values = DVector::zeros(self.outputs.len());
        for sub in &self.submodels {
            let z_i = sub.model.output(&self.sub_state(sub, x));
            for (slot, &gi) in sub.output_idx.iter().enumerate() {
                values[gi] = z_i.vector()[slot];
            }
        }
        Container::new(self.outputs.clone(), values).expect("lengths match")
    }

    fn event_state(&self, x: &Container) -> Option<BTreeMap<String, f64>> {
        let mut out = BTreeMap::new();
        for sub in &self.submodels {
            if sub.model.events().is_empty() {
                continue;
            }
            let es = sub.model.event_state_of(&self.sub_state(sub, x)).ok()?;
            for (k, v) in es {
                out.insert(format!("{}.{}", sub.name, k), v);
            }
        }
        Some(out)
    }

    fn threshold_met(&self, x: &Container) -> Option<BTreeMap<String, bool>> {
        let mut out = BTreeMap::new();
        for sub in &self.submodels {
            if sub.model.events().is_empty() {
                continue;
            }
            let tm = sub.model.threshold_met_of(&self.sub_state(sub, x)).ok()?;
            for (k, v) in tm {
                out.insert(format!("{}.{}", sub.name, k), v);
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loading::no_load;
    use crate::simulation::{simulate_to_threshold, SimConfig, StepPolicy};

    /// Ramps its state at a constant rate; the output `z` reports it.
    struct Ramp {
        states: Schema,
        inputs: Schema,
        outputs: Schema,
    }

    impl Ramp {
        fn new() -> Self {
            Ramp {
                states: Schema::new(["s"]),
                inputs: Schema::new(Vec::<String>::new()),
                outputs: Schema::new(["z"]),
            }
        }
    }

    impl Model for Ramp {
        fn name(&self) -> &str {
            "Ramp"
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

        fn initialize(&self, _u: Option<&Container>, _z: Option<&Container>) -> Container {
            Container::zeros(self.states.clone())
        }

        fn dx(&self, _x: &Container, _u: &Container) -> Option<Container> {
            Container::from_pairs(self.states.clone(), [("s", 1.0)]).ok()
        }

        fn output(&self, x: &Container) -> Container {
            Container::from_pairs(self.outputs.clone(), [("z", x.vector()[0])])
                .expect("output keys")
        }
    }

    /// Integrates its input; full once the total reaches 2.
    struct Accumulator {
        states: Schema,
        inputs: Schema,
        outputs: Schema,
        events: Vec<String>,
    }

    impl Accumulator {
        fn new() -> Self {
            Accumulator {
                states: Schema::new(["total"]),
                inputs: Schema::new(["u"]),
                outputs: Schema::new(["total"]),
                events: vec!["full".to_string()],
            }
        }
    }

    impl Model for Accumulator {
        fn name(&self) -> &str {
            "Accumulator"
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
            Container::zeros(self.states.clone())
        }

        fn dx(&self, _x: &Container, u: &Container) -> Option<Container> {
            Container::from_pairs(self.states.clone(), [("total", u.vector()[0])]).ok()
        }

        fn output(&self, x: &Container) -> Container {
            Container::from_pairs(self.outputs.clone(), [("total", x.vector()[0])])
                .expect("output keys")
        }

        fn event_state(&self, x: &Container) -> Option<BTreeMap<String, f64>> {
            Some(BTreeMap::from([(
                "full".to_string(),
                (1.0 - x.vector()[0] / 2.0).max(0.0),
            )]))
        }
    }

    fn ramp_feeds_accumulator() -> CompositeModel {
        CompositeModel::build(
            vec![
                ("ramp".to_string(), Box::new(Ramp::new()) as Box<dyn Model>),
                ("acc".to_string(), Box::new(Accumulator::new())),
            ],
            &[("ramp.z".to_string(), "acc.u".to_string())],
        )
        .unwrap()
    }

    #[test]
    fn wiring_folds_the_connected_input_away() {
        let m = ramp_feeds_accumulator();
        assert!(m.inputs().is_empty());
        // The ramp's output gains a mirror state holding its last value.
        assert_eq!(m.states().keys(), ["ramp.s", "acc.total", "ramp.z"]);
        assert_eq!(m.events(), ["acc.full"]);

        let x0 = m.initialize(None, None);
        assert_eq!(x0.get("ramp.z"), Some(0.0));
        assert_eq!(m.event_state_of(&x0).unwrap()["acc.full"], 1.0);
    }

    #[test]
    fn composite_runs_to_its_submodel_event() {
        let m = ramp_feeds_accumulator();
        let cfg = SimConfig {
            step: StepPolicy::Fixed(0.01),
            ..SimConfig::default()
        };
        let load = no_load(m.inputs().clone());
        let out = simulate_to_threshold(&m, &load, &cfg, 0.0, 10.0, None).unwrap();
        // The ramp grows linearly, so the accumulator's integral reaches 2
        // at t = 2.
        assert_eq!(out.events_met, vec!["acc.full".to_string()]);
        assert!((out.final_time - 2.0).abs() < 0.02);
        assert!((out.final_state.get("ramp.s").unwrap() - out.final_time).abs() < 1e-9);
    }

    #[test]
    fn malformed_compositions_are_rejected() {
        let one = CompositeModel::build(
            vec![("only".to_string(), Box::new(Ramp::new()) as Box<dyn Model>)],
            &[],
        );
        assert!(matches!(one, Err(ProgError::InvalidComposition(_))));

        let dup = CompositeModel::build(
            vec![
                ("m".to_string(), Box::new(Ramp::new()) as Box<dyn Model>),
                ("m".to_string(), Box::new(Accumulator::new())),
            ],
            &[],
        );
        assert!(matches!(dup, Err(ProgError::InvalidComposition(_))));

        let bad_dst = CompositeModel::build(
            vec![
                ("ramp".to_string(), Box::new(Ramp::new()) as Box<dyn Model>),
                ("acc".to_string(), Box::new(Accumulator::new())),
            ],
            &[("ramp.z".to_string(), "acc.missing".to_string())],
        );
        assert!(matches!(bad_dst, Err(ProgError::InvalidComposition(_))));

        let bad_src = CompositeModel::build(
            vec![
                ("ramp".to_string(), Box::new(Ramp::new()) as Box<dyn Model>),
                ("acc".to_string(), Box::new(Accumulator::new())),
            ],
            &[("ramp.missing".to_string(), "acc.u".to_string())],
        );
        assert!(matches!(bad_src, Err(ProgError::InvalidComposition(_))));
    }
}
