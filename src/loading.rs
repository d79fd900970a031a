//! Future-loading profiles.
//!
//! The simulation engine asks its load profile for the input once per step:
//! `load(t, x)`, where `x` is the current state when one is available.
//! Plain closures are profiles; [`Piecewise`] and [`GaussianLoadWrapper`]
//! cover the common cases of scheduled loads and noisy loads.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::cell::RefCell;

use crate::container::{Container, Schema};
use crate::errors::ProgError;

/// An estimate of future usage: the input applied to the system at time `t`.
pub trait LoadProfile {
    fn load(&self, t: f64, x: Option<&Container>) -> Container;
}

impl<F> LoadProfile for F
where
    F: Fn(f64, Option<&Container>) -> Container,
{
    fn load(&self, t: f64, x: Option<&Container>) -> Container {
        self(t, x)
    }
}

/// Piecewise-constant load: value `i` applies until `times[i]` has passed.
/// With one more value than times, the last value applies forever after.
#[derive(Debug, Clone)]
pub struct Piecewise {
    schema: Schema,
    times: Vec<f64>,
    values: Vec<Container>,
}

impl Piecewise {
    pub fn new(
        schema: Schema,
        times: Vec<f64>,
        values: Vec<Container>,
    ) -> Result<Self, ProgError> {
        if values.len() != times.len() && values.len() != times.len() + 1 {
            return Err(ProgError::DimensionMismatch {
                expected: times.len(),
                got: values.len(),
            });
        }
        let mut times = times;
        if values.len() == times.len() + 1 {
            times.push(f64::INFINITY);
        }
        Ok(Piecewise {
            schema,
            times,
            values,
        })
    }
}

impl LoadProfile for Piecewise {
    fn load(&self, t: f64, _x: Option<&Container>) -> Container {
        for (i, boundary) in self.times.iter().enumerate() {
            if *boundary > t {
                return self.values[i].clone();
            }
        }
        // Past the last boundary: hold the final value.
        self.values
            .last()
            .cloned()
            .unwrap_or_else(|| Container::zeros(self.schema.clone()))
    }
}

/// Wraps another profile, adding Gaussian noise to each input channel.
/// `std_slope` lets the noise grow with time past `t0`, modeling loads that
/// are known well now and poorly far in the future.
pub struct GaussianLoadWrapper<L> {
    inner: L,
    std: f64,
    std_slope: f64,
    t0: f64,
    rng: RefCell<StdRng>,
}

impl<L: LoadProfile> GaussianLoadWrapper<L> {
    pub fn new(inner: L, std: f64) -> Self {
        Self::with_seed(inner, std, rand::random())
    }

    pub fn with_seed(inner: L, std: f64, seed: u64) -> Self {
        GaussianLoadWrapper {
            inner,
            std,
            std_slope: 0.0,
            t0: 0.0,
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_slope(mut self, std_slope: f64, t0: f64) -> Self {
        self.std_slope = std_slope;
        self.t0 = t0;
        self
    }
}

impl<L: LoadProfile> LoadProfile for GaussianLoadWrapper<L> {
    fn load(&self, t: f64, x: Option<&Container>) -> Container {
        let mut input = self.inner.load(t, x);
        let std = if t > self.t0 {
            self.std + self.std_slope * (t - self.t0)
        } else {
            self.std
        };
        if std > 0.0 {
            if let Ok(dist) = Normal::new(0.0, std) {
                let mut rng = self.rng.borrow_mut();
                for v in input.vector_mut().iter_mut() {
                    *v += dist.sample(&mut *rng);
                }
            }
        }
        input
    }
}

/// The no-load profile, for models without inputs.
pub fn no_load(schema: Schema) -> impl LoadProfile {
    move |_t: f64, _x: Option<&Container>| Container::zeros(schema.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piecewise_holds_value_until_boundary() {
        let schema = Schema::new(["i"]);
        let mk = |v| Container::from_pairs(schema.clone(), [("i", v)]).unwrap();
        let profile =
            Piecewise::new(schema.clone(), vec![10.0, 20.0], vec![mk(1.0), mk(2.0), mk(0.5)])
                .unwrap();
        assert_eq!(profile.load(0.0, None).get("i"), Some(1.0));
        assert_eq!(profile.load(15.0, None).get("i"), Some(2.0));
        // Last value is the default after all boundaries.
        assert_eq!(profile.load(100.0, None).get("i"), Some(0.5));
    }

    #[test]
    fn piecewise_rejects_mismatched_lengths() {
        let schema = Schema::new(["i"]);
        let mk = |v| Container::from_pairs(schema.clone(), [("i", v)]).unwrap();
        assert!(Piecewise::new(schema.clone(), vec![10.0, 20.0], vec![mk(1.0)]).is_err());
    }
}
