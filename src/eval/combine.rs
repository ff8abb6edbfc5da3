//! Combination rules for composite results
//!
//! How two operand results merge under an arithmetic operator:
//!
//! - **scalar ⊕ scalar** — one value, O(1).
//! - **scalar ⊕ vector** — the scalar broadcasts across every row of the
//!   vector's value columns; key columns pass through unchanged. Operand
//!   order is tracked explicitly because subtraction and division do not
//!   commute.
//! - **vector ⊕ vector** — requires identical key-column name sets; rows
//!   match by composite group key with inner-join semantics. Differing
//!   key sets yield an explicit **empty** result, not an error: metric
//!   algebra treats disjoint label sets as "no comparable series".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::expr::BinaryOp;
use crate::source::EvalResult;
use crate::table::{Column, ColumnarTable, CompositeKey};

/// Combine two operand results under an operator
///
/// `left_scalar`/`right_scalar` carry the static classification of the
/// operand nodes; the shape decision never depends on the fetched data.
pub fn combine(
    op: BinaryOp,
    left: &EvalResult,
    left_scalar: bool,
    right: &EvalResult,
    right_scalar: bool,
) -> Result<EvalResult> {
    match (left_scalar, right_scalar) {
        (true, true) => {
            let l = scalar_of(left)?;
            let r = scalar_of(right)?;
            Ok(EvalResult::scalar(apply(op, l, r)))
        }
        (true, false) => broadcast(op, scalar_of(left)?, right, ScalarSide::Left),
        (false, true) => broadcast(op, scalar_of(right)?, left, ScalarSide::Right),
        (false, false) => hash_join(op, left, right),
    }
}

/// Which operand position the scalar occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarSide {
    Left,
    Right,
}

fn apply(op: BinaryOp, left: f64, right: f64) -> f64 {
    match op {
        BinaryOp::Add => left + right,
        BinaryOp::Sub => left - right,
        BinaryOp::Mul => left * right,
        BinaryOp::Div => left / right,
    }
}

fn scalar_of(result: &EvalResult) -> Result<f64> {
    result
        .scalar_value()
        .ok_or_else(|| Error::source("scalar operand produced no value"))
}

/// Broadcast a scalar across every value column of a vector operand
fn broadcast(op: BinaryOp, scalar: f64, vector: &EvalResult, side: ScalarSide) -> Result<EvalResult> {
    let mut table = ColumnarTable::new();
    for name in vector.table.column_names() {
        let column = vector
            .table
            .column(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        if vector.value_columns.iter().any(|v| v.as_str() == name) {
            let combined: Vec<f64> = (0..column.len())
                .map(|row| {
                    let value = column.value_f64(row).ok_or_else(|| {
                        Error::invalid_expression(format!(
                            "unsupported data type {} in arithmetic on column '{}'",
                            column.data_type(),
                            name
                        ))
                    })?;
                    Ok(match side {
                        ScalarSide::Left => apply(op, scalar, value),
                        ScalarSide::Right => apply(op, value, scalar),
                    })
                })
                .collect::<Result<_>>()?;
            table.add_column(Column::from_doubles(name, combined))?;
        } else {
            table.add_column(column.clone())?;
        }
    }

    Ok(EvalResult::new(
        Arc::new(table),
        vector.key_columns.clone(),
        vector.value_columns.clone(),
        vector.time_range,
        vector.step_ms,
    ))
}

/// Equi-join two vector results on their composite group key
fn hash_join(op: BinaryOp, left: &EvalResult, right: &EvalResult) -> Result<EvalResult> {
    // Exact-match comparison on key-column names, order-insensitive.
    let left_keys: HashSet<&str> = left.key_columns.iter().map(|s| s.as_str()).collect();
    let right_keys: HashSet<&str> = right.key_columns.iter().map(|s| s.as_str()).collect();
    if left_keys != right_keys {
        tracing::debug!(
            left_keys = ?left.key_columns,
            right_keys = ?right.key_columns,
            "key-column sets differ, no comparable series"
        );
        return Ok(EvalResult::empty(
            left.key_columns.clone(),
            left.value_columns.clone(),
        ));
    }

    if left.value_columns.len() != right.value_columns.len() {
        return Err(Error::unsupported(format!(
            "cannot combine {} value columns with {}",
            left.value_columns.len(),
            right.value_columns.len()
        )));
    }

    // Align both sides on the left's key order before hashing.
    let key_names: Vec<&str> = left.key_columns.iter().map(|s| s.as_str()).collect();
    let left_key_columns = left.table.get_columns(&key_names)?;
    let right_key_columns = right.table.get_columns(&key_names)?;

    let mut right_rows: HashMap<CompositeKey, usize> =
        HashMap::with_capacity(right.row_count());
    for row in 0..right.row_count() {
        right_rows
            .entry(CompositeKey::from_row(&right_key_columns, row))
            .or_insert(row);
    }

    // Inner join: rows whose key exists on only one side are dropped.
    let mut matched: Vec<(usize, usize)> = Vec::new();
    for row in 0..left.row_count() {
        let key = CompositeKey::from_row(&left_key_columns, row);
        if let Some(&right_row) = right_rows.get(&key) {
            matched.push((row, right_row));
        }
    }

    let left_indices: Vec<usize> = matched.iter().map(|(l, _)| *l).collect();

    let mut table = ColumnarTable::new();
    for column in left_key_columns {
        table.add_column(column.view(&left_indices))?;
    }
    for (at, name) in left.value_columns.iter().enumerate() {
        let left_column = left
            .table
            .column(name)
            .ok_or_else(|| Error::ColumnNotFound(name.clone()))?;
        let right_column = right
            .table
            .column(&right.value_columns[at])
            .ok_or_else(|| Error::ColumnNotFound(right.value_columns[at].clone()))?;

        let combined: Vec<f64> = matched
            .iter()
            .map(|&(left_row, right_row)| {
                let l = left_column.value_f64(left_row).ok_or_else(|| {
                    Error::invalid_expression(format!(
                        "unsupported data type {} in arithmetic on column '{}'",
                        left_column.data_type(),
                        name
                    ))
                })?;
                let r = right_column.value_f64(right_row).ok_or_else(|| {
                    Error::invalid_expression(format!(
                        "unsupported data type {} in arithmetic on column '{}'",
                        right_column.data_type(),
                        right_column.name()
                    ))
                })?;
                Ok(apply(op, l, r))
            })
            .collect::<Result<_>>()?;
        table.add_column(Column::from_doubles(name, combined))?;
    }

    Ok(EvalResult::new(
        Arc::new(table),
        left.key_columns.clone(),
        left.value_columns.clone(),
        left.time_range,
        left.step_ms,
    ))
}

// ============================================================================
// Tests
// ============================================================================
