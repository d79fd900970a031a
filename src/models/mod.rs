//! Small reference models used by the tests and demos.

mod thrown_object;

pub use thrown_object::{LinearThrownObject, ThrownObject};
