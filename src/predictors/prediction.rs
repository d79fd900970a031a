use crate::container::Container;
use crate::uncertain::UncertainData;

/// An uncertain quantity sampled along the prediction save grid.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub times: Vec<f64>,
    pub snapshots: Vec<UncertainData>,
}

impl Prediction {
    pub fn new(times: Vec<f64>, snapshots: Vec<UncertainData>) -> Self {
        debug_assert_eq!(times.len(), snapshots.len());
        Prediction { times, snapshots }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The snapshot at the last grid time not after `t`, or the first
    /// snapshot when `t` precedes the grid.
    pub fn snapshot_at(&self, t: f64) -> Option<&UncertainData> {
        match self.times.iter().rposition(|&gt| gt <= t) {
            Some(i) => self.snapshots.get(i),
            None => self.snapshots.first(),
        }
    }

    /// Mean trajectory.
    pub fn mean(&self) -> Vec<Container> {
        self.snapshots.iter().map(UncertainData::mean).collect()
    }
}

/// Everything one `predict` call produced.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub times: Vec<f64>,
    pub inputs: Prediction,
    pub states: Prediction,
    pub outputs: Prediction,
    pub event_states: Prediction,
    /// Per-event time-of-event distribution. Keys are the monitored event
    /// names; an absent outcome (event never crossed within the horizon) is
    /// a NaN component.
    pub time_of_event: UncertainData,
}
