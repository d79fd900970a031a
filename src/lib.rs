//! A prognostics and health-management core.
//!
//! Models declare their states, inputs, outputs and failure events; the
//! simulation engine advances them to event thresholds under a future
//! load; state estimators (Kalman, unscented Kalman, particle) track the
//! current state from noisy measurements; predictors (Monte Carlo,
//! unscented transform) turn the tracked state into time-of-event
//! distributions and the metrics grade those predictions.

extern crate nalgebra as na;

pub mod composite;
pub mod container;
pub mod errors;
pub mod estimators;
pub mod loading;
pub mod metrics;
pub mod model;
pub mod models;
pub mod predictors;
pub mod sigma;
pub mod simulation;
pub mod uncertain;

mod tests;

/// The working surface, importable in one line.
pub mod prelude {
    pub use super::composite::CompositeModel;
    pub use super::container::{Container, Schema};
    pub use super::errors::ProgError;
    pub use super::estimators::{
        KalmanFilter, ParticleFilter, StateEstimator, UnscentedKalmanFilter,
    };
    pub use super::loading::{GaussianLoadWrapper, LoadProfile, Piecewise};
    pub use super::model::{LinearModel, Model, ModelExt, NoiseSpec, Parameters, StateLimits};
    pub use super::predictors::{
        EventStrategy, MonteCarloPredictor, PredictConfig, Prediction, PredictionResult,
        Predictor, ToePredictionProfile, UnscentedTransformPredictor,
    };
    pub use super::simulation::{
        simulate_to_threshold, Integrator, SimConfig, SimOutcome, SimResult, StepPolicy,
    };
    pub use super::uncertain::{
        MultivariateNormalDist, ScalarData, UncertainData, UnweightedSamples,
    };
}
