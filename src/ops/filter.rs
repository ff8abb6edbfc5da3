//! Value-column filtering
//!
//! Filters a table by comparing one already-computed value column against
//! a numeric literal. The comparison is a tagged variant carrying a
//! predicate per numeric type; the column's declared type selects the code
//! path once, not per row. When every row passes, the input table is
//! returned unchanged; otherwise a new view is built from the surviving
//! row indices.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::expr::CmpOp;
use crate::table::ColumnarTable;
use crate::types::Value;

/// Comparison operators the filter step supports
///
/// Equality on computed (floating) values is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Not equal
    Ne,
}

impl CompareOp {
    /// Map a predicate-AST operator onto a filter-step operator
    pub fn try_from_cmp(op: CmpOp) -> Result<Self> {
        match op {
            CmpOp::Lt => Ok(CompareOp::Lt),
            CmpOp::Lte => Ok(CompareOp::Lte),
            CmpOp::Gt => Ok(CompareOp::Gt),
            CmpOp::Gte => Ok(CompareOp::Gte),
            CmpOp::Ne => Ok(CompareOp::Ne),
            CmpOp::Eq => Err(Error::unsupported(
                "equality comparison on computed value columns",
            )),
        }
    }

    fn apply_i64(&self, value: i64, threshold: i64) -> bool {
        match self {
            CompareOp::Lt => value < threshold,
            CompareOp::Lte => value <= threshold,
            CompareOp::Gt => value > threshold,
            CompareOp::Gte => value >= threshold,
            CompareOp::Ne => value != threshold,
        }
    }

    fn apply_f64(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Lt => value < threshold,
            CompareOp::Lte => value <= threshold,
            CompareOp::Gt => value > threshold,
            CompareOp::Gte => value >= threshold,
            CompareOp::Ne => value != threshold,
        }
    }
}

/// Physical operator filtering one value column against a literal
#[derive(Debug)]
pub struct FilterStep {
    column: String,
    op: CompareOp,
    operand: Value,
}

impl FilterStep {
    /// Create a filter over a column; the operand must be numeric
    pub fn new(column: impl Into<String>, op: CompareOp, operand: Value) -> Result<Self> {
        if !operand.data_type().is_numeric() {
            return Err(Error::invalid_expression(format!(
                "filter literal must be numeric, got {}",
                operand.data_type()
            )));
        }
        Ok(Self {
            column: column.into(),
            op,
            operand,
        })
    }

    /// Apply the filter, returning the input table when every row passes
    pub fn execute(&self, table: &Arc<ColumnarTable>) -> Result<Arc<ColumnarTable>> {
        let column = table
            .column(&self.column)
            .ok_or_else(|| Error::ColumnNotFound(self.column.clone()))?;

        // One dispatch on the declared column type; the row loop below
        // runs a monomorphic predicate.
        let indices: Vec<usize> = if let Some(values) = column.longs() {
            match self.operand {
                Value::Long(threshold) => values
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| self.op.apply_i64(v, threshold))
                    .map(|(i, _)| i)
                    .collect(),
                Value::Double(threshold) => values
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| self.op.apply_f64(v as f64, threshold))
                    .map(|(i, _)| i)
                    .collect(),
                _ => {
                    return Err(Error::invalid_expression(
                        "filter literal must be numeric",
                    ))
                }
            }
        } else if let Some(values) = column.doubles() {
            let threshold = match self.operand {
                Value::Long(t) => t as f64,
                Value::Double(t) => t,
                _ => {
                    return Err(Error::invalid_expression(
                        "filter literal must be numeric",
                    ))
                }
            };
            values
                .iter()
                .enumerate()
                .filter(|(_, &v)| self.op.apply_f64(v, threshold))
                .map(|(i, _)| i)
                .collect()
        } else {
            return Err(Error::invalid_expression(format!(
                "unsupported data type {} reaching filter comparator on column '{}'",
                column.data_type(),
                column.name()
            )));
        };

        if indices.len() == table.row_count() {
            return Ok(Arc::clone(table));
        }
        Ok(ColumnarTable::view(table, &indices))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn double_table() -> Arc<ColumnarTable> {
        Arc::new(
            ColumnarTable::from_columns(vec![
                Column::from_strs("host", vec!["a".into(), "b".into(), "c".into(), "d".into()]),
                Column::from_doubles("total", vec![1.0, 2.5, 4.0, 8.0]),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_double_column_gt() {
        let table = double_table();
        let step = FilterStep::new("total", CompareOp::Gt, Value::Double(2.5)).unwrap();

        let result = step.execute(&table).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(
            result.column("total").unwrap().doubles(),
            Some(&[4.0, 8.0][..])
        );
        // Key column follows the selection
        assert_eq!(result.column("host").unwrap().value(0).to_string(), "c");
    }

    #[test]
    fn test_long_column_ne() {
        let table = Arc::new(
            ColumnarTable::from_columns(vec![Column::from_longs("n", vec![1, 2, 2, 3])]).unwrap(),
        );
        let step = FilterStep::new("n", CompareOp::Ne, Value::Long(2)).unwrap();

        let result = step.execute(&table).unwrap();
        assert_eq!(result.column("n").unwrap().longs(), Some(&[1, 3][..]));
    }

    #[test]
    fn test_long_column_with_double_literal() {
        let table = Arc::new(
            ColumnarTable::from_columns(vec![Column::from_longs("n", vec![1, 2, 3])]).unwrap(),
        );
        let step = FilterStep::new("n", CompareOp::Gte, Value::Double(1.5)).unwrap();

        let result = step.execute(&table).unwrap();
        assert_eq!(result.column("n").unwrap().longs(), Some(&[2, 3][..]));
    }

    #[test]
    fn test_all_pass_returns_same_table() {
        let table = double_table();
        let step = FilterStep::new("total", CompareOp::Gte, Value::Double(0.0)).unwrap();

        let result = step.execute(&table).unwrap();
        assert!(Arc::ptr_eq(&table, &result));
    }

    #[test]
    fn test_string_column_rejected() {
        let table = double_table();
        let step = FilterStep::new("host", CompareOp::Gt, Value::Long(0)).unwrap();
        assert!(matches!(
            step.execute(&table),
            Err(Error::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_string_literal_rejected() {
        let err = FilterStep::new("total", CompareOp::Gt, Value::Str("x".into())).unwrap_err();
        assert!(matches!(err, Error::InvalidExpression(_)));
    }

    #[test]
    fn test_equality_not_supported() {
        let err = CompareOp::try_from_cmp(CmpOp::Eq).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }

    #[test]
    fn test_missing_column() {
        let table = double_table();
        let step = FilterStep::new("nope", CompareOp::Gt, Value::Long(0)).unwrap();
        assert!(matches!(
            step.execute(&table),
            Err(Error::ColumnNotFound(_))
        ));
    }
}
