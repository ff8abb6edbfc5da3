//! Composite group keys
//!
//! A `CompositeKey` is an immutable tuple of heterogeneous values read from
//! a fixed set of columns at one row, with its hash precomputed at
//! construction. Keys are created transiently during sliding-window
//! grouping and hash-join combination and discarded afterwards.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::column::Column;
use crate::types::Value;

/// Immutable row-group identity: the values of the key columns at one row
#[derive(Debug, Clone)]
pub struct CompositeKey {
    values: Vec<Value>,
    hash: u64,
}

impl CompositeKey {
    /// Build a key from the given columns at one row index
    pub fn from_row(columns: &[&Column], row: usize) -> Self {
        let values: Vec<Value> = columns.iter().map(|c| c.value(row)).collect();
        Self::from_values(values)
    }

    /// Build a key directly from values
    pub fn from_values(values: Vec<Value>) -> Self {
        let mut hasher = DefaultHasher::new();
        for value in &values {
            value.hash(&mut hasher);
        }
        let hash = hasher.finish();
        Self { values, hash }
    }

    /// The key's component values
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The precomputed hash
    pub fn precomputed_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for CompositeKey {
    fn eq(&self, other: &Self) -> bool {
        // Hash first: a cheap reject for the common non-matching case
        self.hash == other.hash && self.values == other.values
    }
}

impl Eq for CompositeKey {}

impl Hash for CompositeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

// ============================================================================
// Tests
// ============================================================================
