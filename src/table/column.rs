//! Dense typed column storage
//!
//! A `Column` is a named, typed, array-backed sequence. The declared type
//! selects one dense vector; there is no per-row type tag and no null
//! bitmap — every position holds a value.

use crate::error::{Error, Result};
use crate::types::{DataType, Value};

/// Dense array backing for one column, one vector per declared type
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// 64-bit signed integers
    Long(Vec<i64>),
    /// 64-bit floats
    Double(Vec<f64>),
    /// UTF-8 strings
    Str(Vec<String>),
    /// Epoch-millisecond timestamps
    DateTime(Vec<i64>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Long(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::Str(v) => v.len(),
            ColumnData::DateTime(v) => v.len(),
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            ColumnData::Long(_) => DataType::Long,
            ColumnData::Double(_) => DataType::Double,
            ColumnData::Str(_) => DataType::Str,
            ColumnData::DateTime(_) => DataType::DateTime,
        }
    }
}

/// A named, typed, densely stored column
///
/// Invariant: the column's length equals the owning table's row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    /// Create an empty column of the given type
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let data = match data_type {
            DataType::Long => ColumnData::Long(Vec::new()),
            DataType::Double => ColumnData::Double(Vec::new()),
            DataType::Str => ColumnData::Str(Vec::new()),
            DataType::DateTime => ColumnData::DateTime(Vec::new()),
        };
        Self {
            name: name.into(),
            data,
        }
    }

    /// Create a LONG column from values
    pub fn from_longs(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Long(values),
        }
    }

    /// Create a DOUBLE column from values
    pub fn from_doubles(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Double(values),
        }
    }

    /// Create a STRING column from values
    pub fn from_strs(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Str(values),
        }
    }

    /// Create a DATETIME column from epoch-millisecond values
    pub fn from_datetimes(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::DateTime(values),
        }
    }

    /// Column name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared data type
    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the column holds no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value; the value's type must match the declared type
    pub fn push(&mut self, value: Value) -> Result<()> {
        match (&mut self.data, value) {
            (ColumnData::Long(v), Value::Long(x)) => v.push(x),
            (ColumnData::Double(v), Value::Double(x)) => v.push(x),
            // Longs widen losslessly into a double column during ingestion
            (ColumnData::Double(v), Value::Long(x)) => v.push(x as f64),
            (ColumnData::Str(v), Value::Str(x)) => v.push(x),
            (ColumnData::DateTime(v), Value::DateTime(x)) => v.push(x),
            (ColumnData::DateTime(v), Value::Long(x)) => v.push(x),
            (data, value) => {
                return Err(Error::invalid_expression(format!(
                    "cannot append {} value to {} column '{}'",
                    value.data_type(),
                    data.data_type(),
                    self.name
                )))
            }
        }
        Ok(())
    }

    /// Read the value at a row index
    ///
    /// # Panics
    ///
    /// Panics if `row >= len()`; callers iterate within the table's row
    /// count.
    pub fn value(&self, row: usize) -> Value {
        match &self.data {
            ColumnData::Long(v) => Value::Long(v[row]),
            ColumnData::Double(v) => Value::Double(v[row]),
            ColumnData::Str(v) => Value::Str(v[row].clone()),
            ColumnData::DateTime(v) => Value::DateTime(v[row]),
        }
    }

    /// Numeric view of the value at a row index, if the type has one
    pub fn value_f64(&self, row: usize) -> Option<f64> {
        match &self.data {
            ColumnData::Long(v) => Some(v[row] as f64),
            ColumnData::Double(v) => Some(v[row]),
            ColumnData::DateTime(v) => Some(v[row] as f64),
            ColumnData::Str(_) => None,
        }
    }

    /// Borrow the backing LONG vector, if this is a LONG column
    pub fn longs(&self) -> Option<&[i64]> {
        match &self.data {
            ColumnData::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the backing DOUBLE vector, if this is a DOUBLE column
    pub fn doubles(&self) -> Option<&[f64]> {
        match &self.data {
            ColumnData::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the backing DATETIME vector, if this is a DATETIME column
    pub fn datetimes(&self) -> Option<&[i64]> {
        match &self.data {
            ColumnData::DateTime(v) => Some(v),
            _ => None,
        }
    }

    /// Keep only the rows where `mask` is true
    ///
    /// `mask.len()` must equal `len()`.
    pub fn filter(&self, mask: &[bool]) -> Column {
        debug_assert_eq!(mask.len(), self.len());
        let data = match &self.data {
            ColumnData::Long(v) => ColumnData::Long(select_by_mask(v, mask)),
            ColumnData::Double(v) => ColumnData::Double(select_by_mask(v, mask)),
            ColumnData::Str(v) => ColumnData::Str(select_by_mask(v, mask)),
            ColumnData::DateTime(v) => ColumnData::DateTime(select_by_mask(v, mask)),
        };
        Column {
            name: self.name.clone(),
            data,
        }
    }

    /// Gather rows by an explicit index array (supports reordering)
    pub fn view(&self, indices: &[usize]) -> Column {
        let data = match &self.data {
            ColumnData::Long(v) => ColumnData::Long(gather(v, indices)),
            ColumnData::Double(v) => ColumnData::Double(gather(v, indices)),
            ColumnData::Str(v) => ColumnData::Str(gather(v, indices)),
            ColumnData::DateTime(v) => ColumnData::DateTime(gather(v, indices)),
        };
        Column {
            name: self.name.clone(),
            data,
        }
    }

    /// Rename the column, keeping its data
    pub fn renamed(mut self, name: impl Into<String>) -> Column {
        self.name = name.into();
        self
    }
}

fn select_by_mask<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(mask.iter())
        .filter(|(_, &keep)| keep)
        .map(|(v, _)| v.clone())
        .collect()
}

fn gather<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i].clone()).collect()
}

// ============================================================================
// Tests
// ============================================================================
