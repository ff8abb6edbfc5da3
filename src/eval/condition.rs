//! Boolean condition chains over composite expressions
//!
//! Consumers of the evaluator (alerting-style checks) combine node
//! comparisons with AND/OR logic. Evaluation short-circuits: once the
//! outcome is determined, remaining sub-conditions are never invoked, so
//! a leaf referenced only by a skipped branch never executes its query.
//! Nothing cancels work already in flight; its result is discarded.

use futures::future::BoxFuture;
use std::sync::Arc;

use super::EvalNode;
use crate::error::{Error, Result};
use crate::ops::CompareOp;

/// A boolean condition over evaluated metric expressions
pub enum Condition {
    /// Compare a node's result against a numeric threshold
    ///
    /// A scalar result compares directly; a vector result satisfies the
    /// condition when any row's first value column does.
    Compare {
        /// The expression to evaluate
        node: Arc<EvalNode>,
        /// The comparison operator
        op: CompareOp,
        /// The threshold
        threshold: f64,
    },

    /// True when every sub-condition holds; stops at the first false
    All(Vec<Condition>),

    /// True when any sub-condition holds; stops at the first true
    Any(Vec<Condition>),
}

impl Condition {
    /// Compare a node against a threshold
    pub fn compare(node: Arc<EvalNode>, op: CompareOp, threshold: f64) -> Self {
        Condition::Compare {
            node,
            op,
            threshold,
        }
    }

    /// Evaluate the condition
    pub fn evaluate(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            match self {
                Condition::Compare {
                    node,
                    op,
                    threshold,
                } => {
                    let result = node.evaluate().await?;
                    if node.is_scalar() {
                        let value = result
                            .scalar_value()
                            .ok_or_else(|| Error::source("scalar condition produced no value"))?;
                        return Ok(passes(*op, value, *threshold));
                    }

                    let Some(name) = result.value_columns.first() else {
                        return Ok(false);
                    };
                    let column = result
                        .table
                        .column(name)
                        .ok_or_else(|| Error::ColumnNotFound(name.clone()))?;
                    for row in 0..column.len() {
                        let value = column.value_f64(row).ok_or_else(|| {
                            Error::invalid_expression(format!(
                                "unsupported data type {} in condition on column '{}'",
                                column.data_type(),
                                name
                            ))
                        })?;
                        if passes(*op, value, *threshold) {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Condition::All(children) => {
                    for child in children {
                        if !child.evaluate().await? {
                            // Remaining children are never invoked
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Condition::Any(children) => {
                    for child in children {
                        if child.evaluate().await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            }
        })
    }
}

fn passes(op: CompareOp, value: f64, threshold: f64) -> bool {
    match op {
        CompareOp::Lt => value < threshold,
        CompareOp::Lte => value <= threshold,
        CompareOp::Gt => value > threshold,
        CompareOp::Gte => value >= threshold,
        CompareOp::Ne => value != threshold,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluatorConfig;
    use crate::eval::CompositeEvaluator;
    use crate::source::{EvalResult, InMemorySource, MetricSource, SourceRequest};
    use crate::types::{Interval, TimeRange};

    fn scalar_interval() -> Interval {
        Interval::new(TimeRange::new_unchecked(0, 60_000)).with_step_ms(60_000)
    }

    fn fixture(values: &[(&str, f64)]) -> (CompositeEvaluator, Arc<InMemorySource>) {
        let source = InMemorySource::new();
        for (name, value) in values {
            source.insert(*name, EvalResult::scalar(*value));
        }
        let source = Arc::new(source);
        let eval = CompositeEvaluator::new(
            Arc::clone(&source) as Arc<dyn MetricSource>,
            EvaluatorConfig::default(),
        );
        (eval, source)
    }

    #[tokio::test]
    async fn test_scalar_compare() {
        let (eval, _) = fixture(&[("m", 7.0)]);
        let node = eval.query(SourceRequest::new("m", scalar_interval()));

        let high = Condition::compare(Arc::clone(&node), CompareOp::Gt, 5.0);
        assert!(high.evaluate().await.unwrap());

        let low = Condition::compare(node, CompareOp::Lt, 5.0);
        assert!(!low.evaluate().await.unwrap());
    }

    #[tokio::test]
    async fn test_and_short_circuits() {
        let (eval, source) = fixture(&[("a", 1.0), ("b", 1.0)]);
        let a = eval.query(SourceRequest::new("a", scalar_interval()));
        let b = eval.query(SourceRequest::new("b", scalar_interval()));

        let chain = Condition::All(vec![
            // 1.0 > 5.0 is false: the second comparison never runs
            Condition::compare(a, CompareOp::Gt, 5.0),
            Condition::compare(b, CompareOp::Gt, 0.0),
        ]);
        assert!(!chain.evaluate().await.unwrap());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_or_short_circuits() {
        let (eval, source) = fixture(&[("a", 10.0), ("b", 1.0)]);
        let a = eval.query(SourceRequest::new("a", scalar_interval()));
        let b = eval.query(SourceRequest::new("b", scalar_interval()));

        let chain = Condition::Any(vec![
            Condition::compare(a, CompareOp::Gt, 5.0),
            Condition::compare(b, CompareOp::Gt, 0.0),
        ]);
        assert!(chain.evaluate().await.unwrap());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_vector_condition_any_row() {
        use crate::table::{Column, ColumnarTable};

        let table = ColumnarTable::from_columns(vec![
            Column::from_strs("host", vec!["a".into(), "b".into()]),
            Column::from_doubles("total", vec![1.0, 50.0]),
        ])
        .unwrap();
        let result = EvalResult::new(
            Arc::new(table),
            vec!["host".to_string()],
            vec!["total".to_string()],
            TimeRange::new_unchecked(0, 60_000),
            Some(60_000),
        );

        let source = InMemorySource::new();
        source.insert("m", result);
        let source = Arc::new(source);
        let eval = CompositeEvaluator::new(
            Arc::clone(&source) as Arc<dyn MetricSource>,
            EvaluatorConfig::default(),
        );
        let node = eval.query(
            SourceRequest::new("m", scalar_interval()).with_group_by(&["host"]),
        );

        let tripped = Condition::compare(Arc::clone(&node), CompareOp::Gt, 40.0);
        assert!(tripped.evaluate().await.unwrap());

        let quiet = Condition::compare(node, CompareOp::Gt, 100.0);
        assert!(!quiet.evaluate().await.unwrap());
    }
}
