//! Sliding-window aggregation
//!
//! Computes, for every row, the trailing sum of each value column over the
//! preceding window, grouped by key. One forward pass with two pointers:
//! every row enters and leaves the window exactly once within its group,
//! so the whole table is amortized O(rows) regardless of window width.
//!
//! Precondition: the input is sorted by (group columns, bucket timestamp
//! ascending) — the plan builder guarantees this via ORDER BY on the
//! upstream aggregation stage.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::plan::SlidingSpec;
use crate::table::{Column, ColumnarTable, CompositeKey};

/// Physical operator for the sliding-window stage of a plan
pub struct SlidingWindowStep {
    spec: SlidingSpec,
}

/// Per-field running state, typed once from the column's declared type
enum FieldAcc<'t> {
    Long {
        name: &'t str,
        values: &'t [i64],
        sum: i64,
        out: Vec<i64>,
    },
    Double {
        name: &'t str,
        values: &'t [f64],
        sum: f64,
        out: Vec<f64>,
    },
}

impl<'t> FieldAcc<'t> {
    fn for_column(column: &'t Column) -> Result<Self> {
        if let Some(values) = column.longs() {
            return Ok(FieldAcc::Long {
                name: column.name(),
                values,
                sum: 0,
                out: Vec::with_capacity(values.len()),
            });
        }
        if let Some(values) = column.doubles() {
            return Ok(FieldAcc::Double {
                name: column.name(),
                values,
                sum: 0.0,
                out: Vec::with_capacity(values.len()),
            });
        }
        Err(Error::invalid_expression(format!(
            "unsupported data type {} for windowed column '{}'",
            column.data_type(),
            column.name()
        )))
    }

    fn reset(&mut self) {
        match self {
            FieldAcc::Long { sum, .. } => *sum = 0,
            FieldAcc::Double { sum, .. } => *sum = 0.0,
        }
    }

    fn evict(&mut self, row: usize) {
        match self {
            FieldAcc::Long { values, sum, .. } => *sum -= values[row],
            FieldAcc::Double { values, sum, .. } => *sum -= values[row],
        }
    }

    fn accumulate(&mut self, row: usize) {
        match self {
            FieldAcc::Long { values, sum, out, .. } => {
                *sum += values[row];
                out.push(*sum);
            }
            FieldAcc::Double { values, sum, out, .. } => {
                *sum += values[row];
                out.push(*sum);
            }
        }
    }

    fn into_column(self) -> Column {
        match self {
            FieldAcc::Long { name, out, .. } => Column::from_longs(name, out),
            FieldAcc::Double { name, out, .. } => Column::from_doubles(name, out),
        }
    }
}

impl SlidingWindowStep {
    /// Create the operator from the plan's sliding spec
    pub fn new(spec: SlidingSpec) -> Self {
        Self { spec }
    }

    /// Run the trailing-window pass and trim the seed rows
    pub fn execute(&self, table: &Arc<ColumnarTable>) -> Result<Arc<ColumnarTable>> {
        let rows = table.row_count();
        if rows == 0 {
            return Ok(Arc::clone(table));
        }

        let group_names: Vec<&str> = self.spec.group_by.iter().map(|s| s.as_str()).collect();
        let group_columns = table.get_columns(&group_names)?;

        let ts_column = table
            .column(&self.spec.timestamp_column)
            .ok_or_else(|| Error::ColumnNotFound(self.spec.timestamp_column.clone()))?;
        let timestamps = ts_column
            .datetimes()
            .or_else(|| ts_column.longs())
            .ok_or_else(|| {
                Error::invalid_expression(format!(
                    "unsupported data type {} for window timestamp column '{}'",
                    ts_column.data_type(),
                    ts_column.name()
                ))
            })?;

        let mut fields: Vec<FieldAcc<'_>> = self
            .spec
            .value_columns
            .iter()
            .map(|name| {
                let column = table
                    .column(name)
                    .ok_or_else(|| Error::ColumnNotFound(name.clone()))?;
                FieldAcc::for_column(column)
            })
            .collect::<Result<_>>()?;

        let window = self.spec.window_ms;
        let mut window_start = 0usize;
        let mut previous_key: Option<CompositeKey> = None;

        for row in 0..rows {
            let key = CompositeKey::from_row(&group_columns, row);
            if previous_key.as_ref() != Some(&key) {
                // New group: the window restarts here
                window_start = row;
                for field in &mut fields {
                    field.reset();
                }
            }

            while window_start < row && timestamps[window_start] <= timestamps[row] - window {
                for field in &mut fields {
                    field.evict(window_start);
                }
                window_start += 1;
            }

            for field in &mut fields {
                field.accumulate(row);
            }
            previous_key = Some(key);
        }

        // Assemble output preserving the input column order; windowed
        // fields are replaced, everything else is carried through.
        let mut output = ColumnarTable::new();
        let mut produced: Vec<Column> = fields.into_iter().map(FieldAcc::into_column).collect();
        for name in table.column_names() {
            match produced.iter().position(|c| c.name() == name) {
                Some(at) => output.add_column(produced.swap_remove(at))?,
                None => {
                    // Carried columns were validated above via get_columns
                    if let Some(column) = table.column(name) {
                        output.add_column(column.clone())?;
                    }
                }
            }
        }
        let output = Arc::new(output);

        // Rows before the floored true start exist only to seed the window.
        let trim = self.spec.trim_before_ms;
        let mask: Vec<bool> = timestamps.iter().map(|&ts| ts >= trim).collect();
        let trimmed = ColumnarTable::filter(&output, &mask)?;

        tracing::debug!(
            input_rows = rows,
            output_rows = trimmed.row_count(),
            window_ms = window,
            "sliding-window pass complete"
        );
        Ok(trimmed)
    }
}

// ============================================================================
// Tests
// ============================================================================
