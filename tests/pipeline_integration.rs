//! Integration tests for the planning and execution pipeline
//!
//! These tests validate the complete compile-then-execute path:
//! - Aggregator splitting across aggregation and post-aggregation stages
//! - Filter placement and group-by propagation across the chain
//! - Sliding-window execution over planner-produced metadata
//! - Value-column filtering of computed results

use std::sync::Arc;

use metriq::expr::{AggregateFunc, CmpOp, Expr, MacroRegistry, Selector};
use metriq::plan::{
    GenericDialect, MemorySchemaProvider, PipelineStageBuilder, QueryParams, StageKind,
};
use metriq::table::{Column, ColumnarTable};
use metriq::types::{DataType, Interval, TimeRange, Value};
use metriq::{CompareOp, FilterStep, PlannerConfig, SlidingWindowStep, StagePlan};

// ============================================================================
// Helper Functions
// ============================================================================

struct PlanFixture {
    macros: MacroRegistry,
    schema: MemorySchemaProvider,
    dialect: GenericDialect,
    config: PlannerConfig,
}

impl PlanFixture {
    fn new() -> Self {
        let schema = MemorySchemaProvider::new();
        schema.define_all(&[
            ("timestamp", DataType::DateTime),
            ("host", DataType::Str),
            ("requests", DataType::Long),
            ("errors", DataType::Long),
        ]);
        Self {
            macros: MacroRegistry::new(),
            schema,
            dialect: GenericDialect,
            config: PlannerConfig::default(),
        }
    }

    fn build(&self, params: QueryParams) -> StagePlan {
        PipelineStageBuilder::new(&self.macros, &self.schema, &self.dialect, &self.config)
            .build(params)
            .expect("plan should compile")
    }
}

fn sum_of(column: &str) -> Expr {
    Expr::aggregate(AggregateFunc::Sum, vec![Expr::column(column)])
}

/// The table a storage engine would return for the aggregation stage of a
/// single-group sliding-window query: one bucket per step, constant value.
fn aggregated_buckets(start_ms: i64, end_ms: i64, step_ms: i64, value: f64) -> Arc<ColumnarTable> {
    let timestamps: Vec<i64> = (start_ms / step_ms..end_ms / step_ms)
        .map(|i| i * step_ms)
        .collect();
    let values = vec![value; timestamps.len()];
    Arc::new(
        ColumnarTable::from_columns(vec![
            Column::from_datetimes("_bucket", timestamps),
            Column::from_doubles("total", values),
        ])
        .expect("equal-length columns"),
    )
}

// ============================================================================
// Aggregator splitting
// ============================================================================

#[test]
fn test_error_rate_splits_into_two_stages() {
    let fixture = PlanFixture::new();
    let rate = Expr::call(
        "round",
        vec![
            sum_of("errors").div(sum_of("requests")),
            Expr::literal_long(2),
        ],
    );
    let interval = Interval::new(TimeRange::new(0, 600_000).unwrap()).with_step_ms(60_000);
    let params = QueryParams::new("http_metrics", interval)
        .select(Selector::expression("error_rate", rate))
        .with_group_by(&["host"]);

    let plan = fixture.build(params);
    assert_eq!(plan.stage_count(), 2);
    assert_eq!(plan.root.kind, StageKind::PostAggregation);

    let rendered = plan.render();
    // Inner stage computes the raw sums under bare-column aliases
    assert!(rendered.contains("sum(errors) AS errors"));
    assert!(rendered.contains("sum(requests) AS requests"));
    // Outer stage does the arithmetic over the aliases
    assert!(rendered.contains("round((errors / requests), 2) AS error_rate"));
    // Group column propagates into both stages
    assert!(plan.root.selects("host"));
}

#[test]
fn test_plain_aggregate_stays_single_stage() {
    let fixture = PlanFixture::new();
    let interval = Interval::new(TimeRange::new(0, 600_000).unwrap()).with_step_ms(60_000);
    let params = QueryParams::new("http_metrics", interval)
        .select(Selector::expression("total", sum_of("requests")))
        .with_group_by(&["host"]);

    let plan = fixture.build(params);
    assert_eq!(plan.stage_count(), 1);
    assert_eq!(plan.root.kind, StageKind::Aggregation);
    assert_eq!(plan.root.group_by, vec!["host", "_bucket"]);
}

#[test]
fn test_filter_terms_split_around_aggregation() {
    let fixture = PlanFixture::new();
    let interval = Interval::new(TimeRange::new(0, 600_000).unwrap()).with_step_ms(60_000);
    let params = QueryParams::new("http_metrics", interval)
        .select(Selector::expression("total", sum_of("requests")))
        .with_group_by(&["host"])
        .with_filter(
            Expr::column("host")
                .compare(CmpOp::Ne, Expr::literal_str("canary"))
                .and(Expr::column("total").compare(CmpOp::Gte, Expr::literal_long(1000))),
        );

    let plan = fixture.build(params);
    let where_clause = plan.root.filter.as_ref().unwrap().to_string();
    let having_clause = plan.root.having.as_ref().unwrap().to_string();

    assert!(where_clause.contains("host != 'canary'"));
    assert!(!where_clause.contains("total"));
    assert_eq!(having_clause, "total >= 1000");
}

// ============================================================================
// Sliding-window scenario
// ============================================================================

/// Interval 00:00-00:10, step 1m, window 5m: output rows exist only for
/// timestamps >= 00:00, and each retained row is the trailing 5-minute sum
/// ending at that timestamp.
#[test]
fn test_sliding_window_scenario() {
    let fixture = PlanFixture::new();
    let interval = Interval::new(TimeRange::new(0, 600_000).unwrap())
        .with_step_ms(60_000)
        .with_window_ms(300_000);
    let params = QueryParams::new("http_metrics", interval)
        .select(Selector::expression("total", sum_of("requests")));

    let plan = fixture.build(params);
    assert_eq!(plan.root.kind, StageKind::SlidingWindow);

    // The inner aggregation stage fetches five minutes of lookback
    let metriq::plan::StageInput::Stage(aggregation) = &plan.root.input else {
        panic!("sliding stage must wrap the aggregation stage");
    };
    let where_clause = aggregation.filter.as_ref().unwrap().to_string();
    assert!(where_clause.contains("timestamp >= -300000"));
    assert!(where_clause.contains("timestamp < 600000"));

    // Execute the sliding stage over what storage returned: buckets from
    // -5m to +10m, constant 2 requests per minute.
    let sliding = plan.sliding.clone().expect("plan carries a sliding spec");
    let input = aggregated_buckets(-300_000, 600_000, 60_000, 2.0);
    let output = SlidingWindowStep::new(sliding).execute(&input).unwrap();

    // Lookback rows before 00:00 are trimmed
    assert_eq!(output.row_count(), 10);
    let buckets = output.column("_bucket").unwrap().datetimes().unwrap();
    assert!(buckets.iter().all(|&ts| ts >= 0));

    // Every retained bucket already has a full 5-minute window behind it
    assert_eq!(
        output.column("total").unwrap().doubles(),
        Some(&[10.0; 10][..])
    );
}

#[test]
fn test_sliding_window_ramp_without_lookback() {
    // Same scenario but storage has no data before 00:00: the window
    // fills over the first five buckets.
    let fixture = PlanFixture::new();
    let interval = Interval::new(TimeRange::new(0, 600_000).unwrap())
        .with_step_ms(60_000)
        .with_window_ms(300_000);
    let params = QueryParams::new("http_metrics", interval)
        .select(Selector::expression("total", sum_of("requests")));

    let plan = fixture.build(params);
    let input = aggregated_buckets(0, 600_000, 60_000, 2.0);
    let output = SlidingWindowStep::new(plan.sliding.clone().unwrap())
        .execute(&input)
        .unwrap();

    assert_eq!(
        output.column("total").unwrap().doubles(),
        Some(&[2.0, 4.0, 6.0, 8.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0][..])
    );
}

// ============================================================================
// Computed-value filtering
// ============================================================================

#[test]
fn test_filter_step_over_windowed_output() {
    let input = aggregated_buckets(0, 600_000, 60_000, 2.0);
    let windowed = SlidingWindowStep::new(metriq::plan::SlidingSpec {
        group_by: Vec::new(),
        timestamp_column: "_bucket".to_string(),
        value_columns: vec!["total".to_string()],
        window_ms: 300_000,
        trim_before_ms: 0,
    })
    .execute(&input)
    .unwrap();

    // Keep only buckets where the trailing sum has saturated
    let step = FilterStep::new("total", CompareOp::Gte, Value::Double(10.0)).unwrap();
    let filtered = step.execute(&windowed).unwrap();

    assert_eq!(filtered.row_count(), 6);
    assert!(filtered
        .column("total")
        .unwrap()
        .doubles()
        .unwrap()
        .iter()
        .all(|&v| v >= 10.0));

    // A filter nothing fails returns the very same table
    let permissive = FilterStep::new("total", CompareOp::Gt, Value::Double(-1.0)).unwrap();
    let unchanged = permissive.execute(&windowed).unwrap();
    assert!(Arc::ptr_eq(&windowed, &unchanged));
}

// ============================================================================
// Macros through the full pipeline
// ============================================================================

#[test]
fn test_macro_expansion_feeds_stage_construction() {
    let fixture = PlanFixture::new();
    fixture.macros.register(
        "per_minute",
        sum_of("requests").div(Expr::literal_long(60)),
    );

    let interval = Interval::new(TimeRange::new(0, 600_000).unwrap()).with_step_ms(60_000);
    let params = QueryParams::new("http_metrics", interval)
        .select(Selector::expression(
            "rate",
            Expr::Macro("per_minute".to_string()),
        ));

    let plan = fixture.build(params);
    // The expansion contains arithmetic around the aggregate, so the
    // chain needs a post-aggregation stage.
    assert_eq!(plan.stage_count(), 2);
    assert!(plan.render().contains("(requests / 60) AS rate"));
}
