//! Key-value records of training diagnostics.
//!
//! ```rust
//! use tapepg_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("reward_mean", 1.5);
//! record.insert("lane_totals", RecordValue::Array1(vec![1.0, 2.0]));
//! assert_eq!(record.get_scalar("reward_mean").unwrap(), 1.5);
//! ```
use crate::error::TapeError;
use std::collections::HashMap;

/// A value in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A single value, typically a mean over a batch.
    Scalar(f32),

    /// A 1-dimensional array, e.g. per-lane values.
    Array1(Vec<f32>),
}

/// A set of named values produced by one training step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Creates a record containing a single scalar value.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        let mut record = Self::empty();
        record.insert(name, RecordValue::Scalar(value));
        record
    }

    /// Creates a record from key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Inserts a value, overwriting any previous value of the key.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Gets the value of a key.
    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Gets a scalar value.
    pub fn get_scalar(&self, k: &str) -> Result<f32, TapeError> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Ok(*v),
            Some(_) => Err(TapeError::RecordValueTypeError("Scalar".to_string())),
            None => Err(TapeError::RecordKeyError(k.to_string())),
        }
    }

    /// Gets a 1-dimensional array.
    pub fn get_array1(&self, k: &str) -> Result<Vec<f32>, TapeError> {
        match self.0.get(k) {
            Some(RecordValue::Array1(v)) => Ok(v.clone()),
            Some(_) => Err(TapeError::RecordValueTypeError("Array1".to_string())),
            None => Err(TapeError::RecordKeyError(k.to_string())),
        }
    }
}
