use itertools::izip;
use na::{DMatrix, DVector};

use crate::container::Container;
use crate::errors::ProgError;
use crate::model::{Model, ModelExt};
use crate::sigma::{MerweScaledSigmaPoints, SamplingMethod};
use crate::uncertain::{MultivariateNormalDist, UncertainData};

use super::{StateEstimator, DEFAULT_COV};

/// An unscented Kalman filter for nonlinear models.
///
/// At each predict substep, 2n+1 sigma points are drawn deterministically
/// from the current belief, pushed through the model's (noiseless) state
/// transition, and reconstituted into a predicted mean/covariance; the
/// same machinery through the output function yields the innovation
/// covariance and gain. The belief is always a
/// [`MultivariateNormalDist`].
pub struct UnscentedKalmanFilter<'a, M: Model + ?Sized> {
    model: &'a M,
    sampling: Box<dyn SamplingMethod>,
    t: f64,
    dt_max: f64,
    x: DVector<f64>,
    p: DMatrix<f64>,
    q: DMatrix<f64>,
    r: DMatrix<f64>,
}

impl<'a, M: Model + ?Sized> UnscentedKalmanFilter<'a, M> {
    /// Builds the filter with a caller-supplied sampling method.
    pub fn build(
        model: &'a M,
        x0: &UncertainData,
        sampling: Box<dyn SamplingMethod>,
    ) -> Result<Self, ProgError> {
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
            _ => (x0.mean().into_vector(), x0.cov()),
        };
        let m = model.outputs().len();
        Ok(UnscentedKalmanFilter {
            model,
            sampling,
            t: -1e-99,
            dt_max: f64::INFINITY,
            x,
            p,
            q,
            r: DMatrix::from_diagonal_element(m, m, DEFAULT_COV),
        })
    }

    /// Merwe scaled sigma points with the customary scaling defaults.
    pub fn with_defaults(model: &'a M, x0: &UncertainData) -> Result<Self, ProgError> {
        let sampling = MerweScaledSigmaPoints::new(model.states().len(), 1.0, 0.0, -1.0);
        Self::build(model, x0, Box::new(sampling))
    }

    pub fn with_t0(mut self, t0: f64) -> Self {
        self.t = t0;
        self
    }

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

    /// One predict substep: sigma points through the state transition.
    /// Returns the propagated points for reuse by the measurement update.
    fn predict(&mut self, u: &Container, dt: f64) -> Result<DMatrix<f64>, ProgError> {
        let n = self.model.states().len();
        let n2 = self.sampling.num_points();
        let samples = self.sampling.sampling_states(&self.p, &self.x)?;

        let mut propagated = DMatrix::zeros(n, n2);
        for (i, mut col) in propagated.column_iter_mut().enumerate() {
            let xi = Container::new(self.model.states().clone(), samples.column(i).into_owned())?;
            let next = self.model.apply_limits(self.model.step_state(&xi, u, dt)?);
            col.copy_from(next.vector());
        }

        let mean = propagated
            .column_iter()
            .zip(self.sampling.weights_m().iter())
            .fold(DVector::zeros(n), |acc, (x, w)| acc + *w * x);
        let cov = propagated
            .column_iter()
            .zip(self.sampling.weights_c().iter())
            .fold(self.q.clone(), |acc, (x, w)| {
                let d = x - &mean;
                acc + *w * &d * d.transpose()
            });
        self.x = mean;
        self.p = cov;
        Ok(propagated)
    }
}

impl<M: Model + ?Sized> StateEstimator for UnscentedKalmanFilter<'_, M> {
    fn estimate(&mut self, t: f64, u: &Container, z: &Container) -> Result<(), ProgError> {
        let steps = super::substeps(self.t, t, self.dt_max)?;
        let mut propagated = None;
        for dt in steps {
            propagated = Some(self.predict(u, dt)?);
        }
        self.t = t;
        let propagated = propagated.expect("substeps is never empty");

        // Predicted measurements from the propagated sigma points.
        let m = self.model.outputs().len();
        let n2 = self.sampling.num_points();
        let mut measures = DMatrix::zeros(m, n2);
        for (i, mut col) in measures.column_iter_mut().enumerate() {
            let xi = Container::new(
                self.model.states().clone(),
                propagated.column(i).into_owned(),
            )?;
            col.copy_from(self.model.output(&xi).vector());
        }

        let mu_y = measures
            .column_iter()
            .zip(self.sampling.weights_m().iter())
            .fold(DVector::zeros(m), |acc, (y, w)| acc + *w * y);
        let p_yy = measures
            .column_iter()
            .zip(self.sampling.weights_c().iter())
            .fold(DMatrix::zeros(m, m), |acc, (y, w)| {
                let d = y - &mu_y;
                acc + *w * &d * d.transpose()
            });
        let mut p_xy = DMatrix::zeros(self.model.states().len(), m);
        for (i, (x, y)) in izip!(propagated.column_iter(), measures.column_iter()).enumerate() {
            let dx = x - &self.x;
            let dy = y - &mu_y;
            p_xy += self.sampling.weights_c()[i] * dx * dy.transpose();
        }

        let mut measured = DVector::zeros(m);
        for (i, key) in self.model.outputs().keys().iter().enumerate() {
            measured[i] = z.try_get(key)?;
        }

        let s = &p_yy + &self.r;
        let gain = p_xy * s.clone().try_inverse().ok_or(ProgError::Inverse)?;
        self.x += &gain * (measured - mu_y);
        self.p -= &gain * s * gain.transpose();
        Ok(())
    }

    fn current_estimate(&self) -> UncertainData {
        MultivariateNormalDist::new(
            self.model.states().clone(),
            self.x.clone(),
            (&self.p + self.p.transpose()) / 2.0,
        )
        .expect("filter covariance is square and symmetric")
        .into()
    }

    fn time(&self) -> f64 {
        self.t
    }
}
