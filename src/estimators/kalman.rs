use na::{DMatrix, DVector};

use crate::container::Container;
use crate::errors::ProgError;
use crate::model::LinearModel;
use crate::uncertain::{MultivariateNormalDist, UncertainData};

use super::{StateEstimator, DEFAULT_COV};

/// A Kalman filter over a [`LinearModel`] (`dx = A x + B u + E`,
/// `z = C x + D`).
///
/// The continuous transition is discretised per substep as
/// `F = I + A·dt`, with the constant `E` term folded into the input matrix
/// via an always-one input row. Only a mean and covariance are maintained,
/// so an [`UnweightedSamples`](crate::uncertain::UnweightedSamples) initial
/// belief is collapsed to its moments (with a warning).
pub struct KalmanFilter<'a, M: LinearModel + ?Sized> {
    model: &'a M,
    t: f64,
    dt_max: f64,
    x: DVector<f64>,
    p: DMatrix<f64>,
    q: DMatrix<f64>,
    r: DMatrix<f64>,
}

impl<'a, M: LinearModel + ?Sized> KalmanFilter<'a, M> {
    /// Builds the filter from an initial belief. Defaults: `Q = 1e-3·I`,
    /// `R = 1e-3·I`, unlimited prediction substep.
    pub fn build(model: &'a M, x0: &UncertainData) -> Result<Self, ProgError> {
        let n = model.states().len();
        if x0.schema() != model.states() {
            return Err(ProgError::DimensionMismatch {
                expected: n,
                got: x0.schema().len(),
            });
        }
        let q = DMatrix::from_diagonal_element(n, n, DEFAULT_COV);
        let (x, p) = match x0 {
            UncertainData::Scalar(d) => (d.point().vector().clone(), &q / 10.0),
            UncertainData::MultivariateNormal(d) => (d.mean().clone(), d.cov().clone()),
            UncertainData::Samples(d) => {
                log::warn!(
                    "Kalman filter initialised from samples; only mean and covariance are kept"
                );
                (d.mean().into_vector(), d.cov())
            }
        };
        let m = model.outputs().len();
        Ok(KalmanFilter {
            model,
            t: -1e-99,
            dt_max: f64::INFINITY,
            x,
            p,
            q,
            r: DMatrix::from_diagonal_element(m, m, DEFAULT_COV),
        })
    }

    pub fn with_t0(mut self, t0: f64) -> Self {
        self.t = t0;
        self
    }

    /// Caps the prediction substep; estimate calls spanning a larger gap
    /// take multiple predict steps.
    pub fn with_dt_max(mut self, dt_max: f64) -> Self {
        self.dt_max = dt_max;
        self
    }

    pub fn reset_q(&mut self, q: DMatrix<f64>) {
        self.q = q;
    }

    pub fn reset_r(&mut self, r: DMatrix<f64>) {
        self.r = r;
    }
}

impl<M: LinearModel + ?Sized> StateEstimator for KalmanFilter<'_, M> {
    fn estimate(&mut self, t: f64, u: &Container, z: &Container) -> Result<(), ProgError> {
        let n = self.model.states().len();

        // Input vector in model order with a trailing 1 driving the
        // constant E column.
        let mut inputs = DVector::zeros(self.model.inputs().len() + 1);
        for (i, key) in self.model.inputs().keys().iter().enumerate() {
            inputs[i] = u.try_get(key)?;
        }
        inputs[self.model.inputs().len()] = 1.0;

        let a = self.model.a();
        let mut b_aug = DMatrix::zeros(n, self.model.inputs().len() + 1);
        b_aug.columns_mut(0, self.model.inputs().len()).copy_from(&self.model.b());
        b_aug.set_column(self.model.inputs().len(), &self.model.e());

        for dt in super::substeps(self.t, t, self.dt_max)? {
            let f = &a * dt + DMatrix::identity(n, n);
            self.x = &f * &self.x + &b_aug * dt * &inputs;
            self.p = &f * &self.p * f.transpose() + &self.q;
        }
        self.t = t;

        // Measurement update. The model form is z = C x + D, the filter
        // form z = C x, so D is subtracted from the measurement first.
        let mut outputs = DVector::zeros(self.model.outputs().len());
        for (i, key) in self.model.outputs().keys().iter().enumerate() {
            outputs[i] = z.try_get(key)?;
        }
        outputs -= self.model.d();

        let c = self.model.c();
        let innovation = &outputs - &c * &self.x;
        let s = &c * &self.p * c.transpose() + &self.r;
        let gain = &self.p * c.transpose() * s.try_inverse().ok_or(ProgError::Inverse)?;
        self.x += &gain * innovation;
        self.p = (DMatrix::identity(n, n) - &gain * &c) * &self.p;
        Ok(())
    }

    fn current_estimate(&self) -> UncertainData {
        MultivariateNormalDist::new(
            self.model.states().clone(),
            self.x.clone(),
            // Symmetrise against floating-point drift in the update.
            (&self.p + self.p.transpose()) / 2.0,
        )
        .expect("filter covariance is square and symmetric")
        .into()
    }

    fn time(&self) -> f64 {
        self.t
    }
}
