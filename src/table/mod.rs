//! Dense columnar storage
//!
//! This module provides the columnar table abstraction the physical
//! operators and the composite evaluator work over:
//!
//! - [`Column`] — named, typed, array-backed value sequence
//! - [`ColumnarTable`] — ordered name → column mapping, equal lengths
//! - [`CompositeKey`] — immutable row-group identity with precomputed hash
//!
//! Tables are shared as `Arc<ColumnarTable>`. Selections that keep every
//! row in order return the same `Arc` without copying; anything else
//! produces a new table.

pub mod column;
pub mod key;

pub use column::{Column, ColumnData};
pub use key::CompositeKey;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::Value;

// ============================================================================
// ColumnarTable
// ============================================================================

/// An ordered mapping of name → dense column
///
/// Invariants: every column has the same length, which is the table's row
/// count; insertion order of column names is preserved. A table owns its
/// columns exclusively and is never mutated after construction except by
/// explicit appends during ingestion of raw rows.
#[derive(Debug, Clone, Default)]
pub struct ColumnarTable {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl ColumnarTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from columns, validating equal lengths
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut table = Self::new();
        table.add_columns(columns)?;
        Ok(table)
    }

    /// Number of rows (0 when the table has no columns)
    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Whether the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    /// Insert or replace a column by name, preserving insertion order for
    /// new names
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.len() != self.row_count() {
            return Err(Error::invalid_expression(format!(
                "column '{}' has {} rows, table has {}",
                column.name(),
                column.len(),
                self.row_count()
            )));
        }
        match self.index.get(column.name()) {
            Some(&slot) => self.columns[slot] = column,
            None => {
                self.index.insert(column.name().to_string(), self.columns.len());
                self.columns.push(column);
            }
        }
        Ok(())
    }

    /// Insert or replace several columns
    pub fn add_columns(&mut self, columns: impl IntoIterator<Item = Column>) -> Result<()> {
        for column in columns {
            self.add_column(column)?;
        }
        Ok(())
    }

    /// Look up one column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&slot| &self.columns[slot])
    }

    /// Look up several columns, failing with the first missing name
    pub fn get_columns(&self, names: &[&str]) -> Result<Vec<&Column>> {
        names
            .iter()
            .map(|&name| {
                self.column(name)
                    .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
            })
            .collect()
    }

    /// Append one row; `values` must match the column order and types
    pub fn append_row(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::invalid_expression(format!(
                "row has {} values, table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value)?;
        }
        Ok(())
    }

    /// Keep only the rows where `mask` is true
    ///
    /// If the mask selects every row the same table is returned without
    /// copying; otherwise each column is filtered independently into a new
    /// table.
    pub fn filter(table: &Arc<ColumnarTable>, mask: &[bool]) -> Result<Arc<ColumnarTable>> {
        if mask.len() != table.row_count() {
            return Err(Error::invalid_expression(format!(
                "selection mask has {} entries, table has {} rows",
                mask.len(),
                table.row_count()
            )));
        }
        if mask.iter().all(|&keep| keep) {
            return Ok(Arc::clone(table));
        }

        let mut filtered = ColumnarTable::new();
        for column in &table.columns {
            filtered.add_column(column.filter(mask))?;
        }
        Ok(Arc::new(filtered))
    }

    /// Gather rows by an explicit index array
    ///
    /// Supports arbitrary reordering, not just subsetting. A full in-order
    /// selection returns the same table without copying.
    pub fn view(table: &Arc<ColumnarTable>, indices: &[usize]) -> Arc<ColumnarTable> {
        let full = indices.len() == table.row_count()
            && indices.iter().enumerate().all(|(at, &i)| at == i);
        if full {
            return Arc::clone(table);
        }

        let mut viewed = ColumnarTable::new();
        for column in &table.columns {
            // Gathered columns all share indices.len(), so this cannot fail
            let _ = viewed.add_column(column.view(indices));
        }
        Arc::new(viewed)
    }

    /// Materialize a row-major list of maps
    ///
    /// Provided for external consumption only; internal paths stay
    /// columnar.
    pub fn to_rows(&self) -> Vec<BTreeMap<String, Value>> {
        let mut rows = Vec::with_capacity(self.row_count());
        for row in 0..self.row_count() {
            let mut map = BTreeMap::new();
            for column in &self.columns {
                map.insert(column.name().to_string(), column.value(row));
            }
            rows.push(map);
        }
        rows
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn sample_table() -> Arc<ColumnarTable> {
        let table = ColumnarTable::from_columns(vec![
            Column::from_strs("host", vec!["a".into(), "b".into(), "c".into()]),
            Column::from_doubles("value", vec![1.0, 2.0, 3.0]),
        ])
        .unwrap();
        Arc::new(table)
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut table = ColumnarTable::new();
        table.add_column(Column::new("b", DataType::Long)).unwrap();
        table.add_column(Column::new("a", DataType::Long)).unwrap();
        // Replacing keeps the original slot
        table.add_column(Column::new("b", DataType::Double)).unwrap();
        assert_eq!(table.column_names(), vec!["b", "a"]);
        assert_eq!(table.column("b").unwrap().data_type(), DataType::Double);
    }

    #[test]
    fn test_mismatched_length_rejected() {
        let mut table = ColumnarTable::new();
        table
            .add_column(Column::from_longs("a", vec![1, 2, 3]))
            .unwrap();
        let result = table.add_column(Column::from_longs("b", vec![1]));
        assert!(result.is_err());
    }

    #[test]
    fn test_get_columns_names_missing() {
        let table = sample_table();
        let err = table.get_columns(&["host", "nope"]).unwrap_err();
        assert!(format!("{}", err).contains("nope"));
    }

    #[test]
    fn test_filter_full_selection_is_identity() {
        let table = sample_table();
        let same = ColumnarTable::filter(&table, &[true, true, true]).unwrap();
        assert!(Arc::ptr_eq(&table, &same));
    }

    #[test]
    fn test_filter_subset() {
        let table = sample_table();
        let subset = ColumnarTable::filter(&table, &[true, false, true]).unwrap();
        assert!(!Arc::ptr_eq(&table, &subset));
        assert_eq!(subset.row_count(), 2);
        assert_eq!(
            subset.column("value").unwrap().doubles(),
            Some(&[1.0, 3.0][..])
        );
    }

    #[test]
    fn test_view_full_in_order_is_identity() {
        let table = sample_table();
        let same = ColumnarTable::view(&table, &[0, 1, 2]);
        assert!(Arc::ptr_eq(&table, &same));

        // A reordering of every row still copies
        let reordered = ColumnarTable::view(&table, &[2, 1, 0]);
        assert!(!Arc::ptr_eq(&table, &reordered));
        assert_eq!(
            reordered.column("value").unwrap().doubles(),
            Some(&[3.0, 2.0, 1.0][..])
        );
    }

    #[test]
    fn test_append_row() {
        let mut table = ColumnarTable::new();
        table.add_column(Column::new("host", DataType::Str)).unwrap();
        table.add_column(Column::new("value", DataType::Double)).unwrap();

        table
            .append_row(vec![Value::Str("a".into()), Value::Double(1.5)])
            .unwrap();
        assert_eq!(table.row_count(), 1);

        let err = table.append_row(vec![Value::Str("b".into())]);
        assert!(err.is_err());
    }

    #[test]
    fn test_to_rows() {
        let table = sample_table();
        let rows = table.to_rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].get("host"), Some(&Value::Str("b".into())));
        assert_eq!(rows[1].get("value"), Some(&Value::Double(2.0)));
    }
}
