use thiserror::Error;

/// Crate-wide error type.
///
/// Only configuration errors live here: a malformed model, an invalid
/// covariance, a bad step size. Numerical conditions that the algorithms can
/// correct (state clipped to its limits, degenerate particle weights, a
/// near-singular covariance floored back to positive definite) are surfaced
/// as `log::warn!` events instead, and the computation continues.
#[derive(Debug, Error)]
pub enum ProgError {
    /// A vector or matrix did not have the dimensions the schema requires.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A key was used that is not part of the container's schema.
    #[error("unknown key `{0}`")]
    UnknownKey(String),

    /// An event name was requested that the model does not declare.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    /// Covariance matrix is not square, or not symmetric.
    #[error("invalid covariance: {0}")]
    InvalidCovariance(String),

    /// Simulation or estimation step size must be positive.
    #[error("invalid step size {0}, dt must be > 0")]
    InvalidStepSize(f64),

    /// The model defines neither `dx` nor `next_state`.
    #[error("model `{0}` defines neither dx nor next_state")]
    MissingTransition(String),

    /// The model declares events but supplies neither `event_state` nor
    /// `threshold_met`.
    #[error("model `{0}` declares events but defines neither event_state nor threshold_met")]
    MissingEventFunction(String),

    /// A composite model's submodels or connections are malformed.
    #[error("invalid composition: {0}")]
    InvalidComposition(String),

    /// `estimate` was called with a timestamp at or before the previous one.
    #[error("non-monotonic time: t = {t} is not after previous t = {prev}")]
    NonmonotonicTime { t: f64, prev: f64 },

    /// Cholesky decomposition failed even after diagonal flooring.
    #[error("cholesky decomposition failed, covariance is not positive definite")]
    Cholesky,

    /// Matrix inversion failed while computing a filter gain.
    #[error("matrix inversion failed")]
    Inverse,

    /// A distribution with no samples cannot answer queries.
    #[error("empty sample set")]
    EmptySamples,

    /// Predictor asked to run with no events and no horizon.
    #[error("predicting with no events requires a finite horizon")]
    UnboundedPrediction,
}
