//! Storage collaborator boundary
//!
//! The staged plan ultimately executes against a storage engine this crate
//! never sees. [`MetricSource`] is that seam: it accepts the distilled
//! request — data-source name, interval, step/window, group columns,
//! filter text, output fields — and returns an asynchronous columnar
//! result. Retries and timeouts are its responsibility, not this crate's.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::table::ColumnarTable;
use crate::types::{Interval, TimeRange, Value};

// ============================================================================
// Request and result types
// ============================================================================

/// One leaf query handed to the storage collaborator
#[derive(Debug, Clone)]
pub struct SourceRequest {
    /// Data-source (table) name
    pub source: String,

    /// Time parameters, offset already folded in by the planner
    pub interval: Interval,

    /// Group-by columns
    pub group_by: Vec<String>,

    /// Rendered filter expression text, if any
    pub filter: Option<String>,

    /// Output fields to return
    pub fields: Vec<String>,
}

impl SourceRequest {
    /// Create a request for a source over an interval
    pub fn new(source: impl Into<String>, interval: Interval) -> Self {
        Self {
            source: source.into(),
            interval,
            group_by: Vec::new(),
            filter: None,
            fields: Vec::new(),
        }
    }

    /// Set group-by columns
    pub fn with_group_by(mut self, columns: &[&str]) -> Self {
        self.group_by = columns.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Set the filter expression text
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set output fields
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Whether this request can only produce a scalar result: no grouping
    /// and exactly one time bucket
    ///
    /// Decidable at compile time, before any data is fetched.
    pub fn is_scalar(&self) -> bool {
        self.group_by.is_empty() && self.interval.bucket_count() == 1
    }

    /// The same request shifted by a (negative) offset
    pub fn with_offset_ms(mut self, offset_ms: i64) -> Self {
        self.interval = self.interval.with_offset_ms(offset_ms);
        self
    }
}

/// A columnar result with its shape metadata
///
/// Produced both by the storage boundary and by evaluator nodes; consumed
/// by the combination logic downstream.
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// The columnar rows
    pub table: Arc<ColumnarTable>,

    /// Columns identifying a series row (group columns plus the bucket)
    pub key_columns: Vec<String>,

    /// Computed value columns
    pub value_columns: Vec<String>,

    /// Time bounds the rows cover
    pub time_range: TimeRange,

    /// Bucket width, when the result is bucketed
    pub step_ms: Option<i64>,
}

impl EvalResult {
    /// Create a result over a table
    pub fn new(
        table: Arc<ColumnarTable>,
        key_columns: Vec<String>,
        value_columns: Vec<String>,
        time_range: TimeRange,
        step_ms: Option<i64>,
    ) -> Self {
        Self {
            table,
            key_columns,
            value_columns,
            time_range,
            step_ms,
        }
    }

    /// A single-value result with no key columns
    pub fn scalar(value: f64) -> Self {
        let table = ColumnarTable::from_columns(vec![crate::table::Column::from_doubles(
            "value",
            vec![value],
        )])
        .unwrap_or_default();
        Self {
            table: Arc::new(table),
            key_columns: Vec::new(),
            value_columns: vec!["value".to_string()],
            time_range: TimeRange::new_unchecked(0, 0),
            step_ms: None,
        }
    }

    /// An empty result with the given shape
    pub fn empty(key_columns: Vec<String>, value_columns: Vec<String>) -> Self {
        Self {
            table: Arc::new(ColumnarTable::new()),
            key_columns,
            value_columns,
            time_range: TimeRange::new_unchecked(0, 0),
            step_ms: None,
        }
    }

    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }

    /// Whether the materialized shape is a single ungrouped value
    pub fn is_scalar(&self) -> bool {
        self.key_columns.is_empty() && self.row_count() == 1
    }

    /// The single value of a scalar result
    pub fn scalar_value(&self) -> Option<f64> {
        if !self.is_scalar() {
            return None;
        }
        let name = self.value_columns.first()?;
        self.table.column(name)?.value_f64(0)
    }

    /// Row-major export for external consumers
    pub fn to_rows(&self) -> Vec<std::collections::BTreeMap<String, Value>> {
        self.table.to_rows()
    }

    /// JSON export for external consumers
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "rowCount": self.row_count(),
            "keyColumns": self.key_columns,
            "valueColumns": self.value_columns,
            "timeRange": self.time_range,
            "stepMs": self.step_ms,
            "rows": self.to_rows(),
        })
    }
}

// ============================================================================
// Source trait
// ============================================================================

/// Asynchronous storage collaborator executing leaf metric queries
///
/// This crate treats it as an opaque leaf; the implementation owns
/// connectivity, retries, and timeouts.
#[async_trait]
pub trait MetricSource: Send + Sync + 'static {
    /// Execute one leaf query and return its columnar result
    async fn execute(&self, request: &SourceRequest) -> Result<EvalResult>;
}

// ============================================================================
// In-memory source
// ============================================================================

/// In-memory [`MetricSource`] for tests and embedded use
///
/// Results are registered per source name; every execution is counted so
/// tests can assert single-evaluation behavior.
#[derive(Default)]
pub struct InMemorySource {
    results: RwLock<HashMap<String, EvalResult>>,
    calls: AtomicUsize,
}

impl InMemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the result returned for a source name
    pub fn insert(&self, source: impl Into<String>, result: EvalResult) {
        self.results.write().insert(source.into(), result);
    }

    /// Number of `execute` calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for InMemorySource {
    async fn execute(&self, request: &SourceRequest) -> Result<EvalResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .read()
            .get(&request.source)
            .cloned()
            .ok_or_else(|| Error::source(format!("unknown data source '{}'", request.source)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn minute_interval(buckets: i64) -> Interval {
        Interval::new(TimeRange::new_unchecked(0, buckets * 60_000)).with_step_ms(60_000)
    }

    #[test]
    fn test_request_scalar_classification() {
        // One bucket, no grouping: scalar
        let scalar = SourceRequest::new("m", minute_interval(1));
        assert!(scalar.is_scalar());

        // Several buckets: vector
        assert!(!SourceRequest::new("m", minute_interval(10)).is_scalar());

        // Grouping always makes it a vector
        let grouped = SourceRequest::new("m", minute_interval(1)).with_group_by(&["host"]);
        assert!(!grouped.is_scalar());
    }

    #[test]
    fn test_scalar_result() {
        let result = EvalResult::scalar(6.0);
        assert!(result.is_scalar());
        assert_eq!(result.scalar_value(), Some(6.0));
    }

    #[test]
    fn test_vector_result_has_no_scalar_value() {
        let table = Arc::new(
            ColumnarTable::from_columns(vec![
                Column::from_strs("host", vec!["a".into()]),
                Column::from_doubles("total", vec![1.0]),
            ])
            .unwrap(),
        );
        let result = EvalResult::new(
            table,
            vec!["host".to_string()],
            vec!["total".to_string()],
            TimeRange::new_unchecked(0, 60_000),
            Some(60_000),
        );
        assert!(!result.is_scalar());
        assert_eq!(result.scalar_value(), None);
    }

    #[tokio::test]
    async fn test_in_memory_source_counts_calls() {
        let source = InMemorySource::new();
        source.insert("m", EvalResult::scalar(1.0));

        let request = SourceRequest::new("m", minute_interval(1));
        source.execute(&request).await.unwrap();
        source.execute(&request).await.unwrap();
        assert_eq!(source.calls(), 2);

        let missing = SourceRequest::new("other", minute_interval(1));
        assert!(source.execute(&missing).await.is_err());
    }

    #[test]
    fn test_json_export_shape() {
        let result = EvalResult::scalar(2.5);
        let json = result.to_json();
        assert_eq!(json["rowCount"], 1);
        assert_eq!(json["rows"][0]["value"], 2.5);
    }
}
