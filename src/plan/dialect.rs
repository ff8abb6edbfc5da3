//! Backend dialect collaborator
//!
//! The plan builder is backend-agnostic; everything a concrete backend
//! decides — which aggregates need window-function rendering, how to
//! floor a timestamp to a bucket, identifier quoting, timestamp literals,
//! whether nested stages need explicit aliases — comes through this trait.
//! The concrete SQL text rendering itself happens outside this crate.

use chrono::{TimeZone, Utc};

use crate::error::Result;
use crate::expr::{AggregateFunc, Expr};

/// Per-backend rendering decisions consulted during planning
pub trait Dialect: Send + Sync {
    /// Whether the backend must render this aggregate as a window function
    /// because it cannot express it as a plain GROUP BY aggregate
    fn requires_window_function(&self, func: &AggregateFunc) -> bool;

    /// Build the window-function expression for an aggregate
    fn window_function(
        &self,
        func: AggregateFunc,
        args: Vec<Expr>,
        partition_by: Vec<String>,
        order_by: String,
    ) -> Result<Expr> {
        Ok(Expr::WindowFunction {
            func,
            args,
            partition_by,
            order_by,
        })
    }

    /// Build the timestamp-floor expression for bucketing
    fn time_floor(&self, timestamp: Expr, step_ms: i64) -> Expr;

    /// Render a timestamp literal (ISO-8601)
    fn timestamp_literal(&self, epoch_ms: i64) -> String;

    /// Quote an identifier for the backend
    fn quote_identifier(&self, ident: &str) -> String;

    /// Whether nested stages require explicit aliases when rendered
    fn requires_stage_aliases(&self) -> bool;

    /// Per-node rewrite hook, applied bottom-up over every finalized
    /// stage's selector expressions as the last planning step
    ///
    /// Must not alter plan structure; it only replaces expression nodes.
    fn rewrite_node(&self, expr: Expr) -> Result<Expr> {
        Ok(expr)
    }
}

/// Default dialect with portable choices
///
/// First/last value aggregates go through window functions; bucketing uses
/// an epoch-floor function call; identifiers are double-quoted.
#[derive(Debug, Clone, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {
    fn requires_window_function(&self, func: &AggregateFunc) -> bool {
        matches!(func, AggregateFunc::First | AggregateFunc::Last)
    }

    fn time_floor(&self, timestamp: Expr, step_ms: i64) -> Expr {
        Expr::call("time_floor", vec![timestamp, Expr::literal_long(step_ms)])
    }

    fn timestamp_literal(&self, epoch_ms: i64) -> String {
        match Utc.timestamp_millis_opt(epoch_ms).single() {
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            None => epoch_ms.to_string(),
        }
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn requires_stage_aliases(&self) -> bool {
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_last_need_window_rendering() {
        let dialect = GenericDialect;
        assert!(dialect.requires_window_function(&AggregateFunc::First));
        assert!(dialect.requires_window_function(&AggregateFunc::Last));
        assert!(!dialect.requires_window_function(&AggregateFunc::Sum));
    }

    #[test]
    fn test_timestamp_literal_iso8601() {
        let dialect = GenericDialect;
        assert_eq!(dialect.timestamp_literal(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            dialect.timestamp_literal(1_700_000_000_000),
            "2023-11-14T22:13:20.000Z"
        );
    }

    #[test]
    fn test_quote_identifier_escapes() {
        let dialect = GenericDialect;
        assert_eq!(dialect.quote_identifier("host"), "\"host\"");
        assert_eq!(dialect.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_time_floor_shape() {
        let dialect = GenericDialect;
        let expr = dialect.time_floor(Expr::column("ts"), 60_000);
        assert_eq!(expr.to_string(), "time_floor(ts, 60000)");
    }
}
