//! Fixed-schema named vectors.
//!
//! Model states, inputs and outputs are mappings from a fixed key set to
//! numbers. The key set never changes for a given model, so names are
//! resolved to indices once, at schema construction, and the values live in
//! a contiguous `DVector<f64>`. Both views (named and positional) address
//! the same storage, which keeps the hot simulation loop free of per-key
//! hashing and lets batched code work on the raw vectors directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use na::{DMatrix, DVector};

use crate::errors::ProgError;

#[derive(Debug)]
struct SchemaInner {
    keys: Vec<String>,
    index: HashMap<String, usize>,
}

/// An ordered, immutable set of variable names with name-to-index lookup.
///
/// Cheap to clone: every `Container` sharing a schema shares one allocation.
#[derive(Debug, Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

impl Schema {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let index = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        Schema {
            inner: Arc::new(SchemaInner { keys, index }),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.inner.keys
    }

    pub fn len(&self) -> usize {
        self.inner.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.keys.is_empty()
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.inner.index.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.index.contains_key(key)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.keys == other.inner.keys
    }
}

impl Eq for Schema {}

/// A named numeric vector bound to a [`Schema`].
///
/// Dictionary-like access (`get`/`set` by name) and matrix-form access
/// (`vector`/`vector_mut`) are two views of the same data.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    schema: Schema,
    values: DVector<f64>,
}

impl Container {
    /// Wraps a raw vector. Fails if its length differs from the schema's.
    pub fn new(schema: Schema, values: DVector<f64>) -> Result<Self, ProgError> {
        if values.len() != schema.len() {
            return Err(ProgError::DimensionMismatch {
                expected: schema.len(),
                got: values.len(),
            });
        }
        Ok(Container { schema, values })
    }

    pub fn zeros(schema: Schema) -> Self {
        let values = DVector::zeros(schema.len());
        Container { schema, values }
    }

    /// Builds a container from key/value pairs. Keys missing from `pairs`
    /// are filled with NaN; keys not in the schema are rejected.
    pub fn from_pairs<'a, I>(schema: Schema, pairs: I) -> Result<Self, ProgError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut values = DVector::from_element(schema.len(), f64::NAN);
        for (key, value) in pairs {
            match schema.index_of(key) {
                Some(i) => values[i] = value,
                None => return Err(ProgError::UnknownKey(key.to_string())),
            }
        }
        Ok(Container { schema, values })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn keys(&self) -> &[String] {
        self.schema.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.schema.index_of(key).map(|i| self.values[i])
    }

    pub fn try_get(&self, key: &str) -> Result<f64, ProgError> {
        self.get(key)
            .ok_or_else(|| ProgError::UnknownKey(key.to_string()))
    }

    pub fn set(&mut self, key: &str, value: f64) -> Result<(), ProgError> {
        match self.schema.index_of(key) {
            Some(i) => {
                self.values[i] = value;
                Ok(())
            }
            None => Err(ProgError::UnknownKey(key.to_string())),
        }
    }

    /// Positional view of the data.
    pub fn vector(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn vector_mut(&mut self) -> &mut DVector<f64> {
        &mut self.values
    }

    pub fn into_vector(self) -> DVector<f64> {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.schema
            .keys()
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| (k.as_str(), *v))
    }

    /// `self + factor * other`, the kernel of explicit integration steps.
    pub fn scaled_add(&self, other: &Container, factor: f64) -> Container {
        Container {
            schema: self.schema.clone(),
            values: &self.values + factor * &other.values,
        }
    }

    /// Replaces the values, keeping the schema.
    pub fn with_vector(&self, values: DVector<f64>) -> Result<Container, ProgError> {
        Container::new(self.schema.clone(), values)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// Stacks containers column-wise into one matrix for batched operations.
/// All containers must share a schema; the result is `len × n`.
pub fn to_matrix(containers: &[Container]) -> Result<DMatrix<f64>, ProgError> {
    let first = containers.first().ok_or(ProgError::EmptySamples)?;
    for c in containers {
        if c.schema() != first.schema() {
            return Err(ProgError::DimensionMismatch {
                expected: first.len(),
                got: c.len(),
            });
        }
    }
    let columns: Vec<_> = containers.iter().map(|c| c.vector().clone()).collect();
    Ok(DMatrix::from_columns(&columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_positional_views_agree() {
        let schema = Schema::new(["x", "v"]);
        let mut c = Container::from_pairs(schema, [("x", 10.0), ("v", 0.0)]).unwrap();
        assert_eq!(c.get("x"), Some(10.0));
        c.vector_mut()[1] = -9.81;
        assert_eq!(c.get("v"), Some(-9.81));
        c.set("x", 5.0).unwrap();
        assert_eq!(c.vector()[0], 5.0);
    }

    #[test]
    fn missing_keys_fill_nan_unknown_keys_fail() {
        let schema = Schema::new(["a", "b"]);
        let c = Container::from_pairs(schema.clone(), [("a", 1.0)]).unwrap();
        assert!(c.get("b").unwrap().is_nan());
        assert!(Container::from_pairs(schema, [("c", 1.0)]).is_err());
    }

    #[test]
    fn matrix_form_stacks_columns() {
        let schema = Schema::new(["a", "b"]);
        let c1 = Container::from_pairs(schema.clone(), [("a", 1.0), ("b", 2.0)]).unwrap();
        let c2 = Container::from_pairs(schema, [("a", 3.0), ("b", 4.0)]).unwrap();
        let m = to_matrix(&[c1, c2]).unwrap();
        assert_eq!(m.ncols(), 2);
        assert_eq!(m[(1, 1)], 4.0);
    }
}
