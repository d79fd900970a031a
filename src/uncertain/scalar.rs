use na::DVector;

use crate::container::{Container, Schema};

use super::UnweightedSamples;

/// A point value carrying no uncertainty. Mean, median and every sample are
/// the point itself; covariance is all zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarData {
    point: Container,
}

impl ScalarData {
    pub fn new(point: Container) -> Self {
        ScalarData { point }
    }

    pub fn schema(&self) -> &Schema {
        self.point.schema()
    }

    pub fn point(&self) -> &Container {
        &self.point
    }

    /// `n` copies of the point.
    pub fn sample(&self, n: usize) -> UnweightedSamples {
        UnweightedSamples::new(
            self.schema().clone(),
            (0..n).map(|_| self.point.vector().clone()).collect(),
        )
    }

    pub(super) fn shift(&mut self, offset: &DVector<f64>) {
        *self.point.vector_mut() += offset;
    }
}
