//! Pipeline stage construction
//!
//! Assembles the chained stages for one metric query in the fixed order
//! `[window-aggregation?] → aggregation → [sliding-window?] →
//! [post-aggregation?]`. Construction threads an immutable build context
//! through a sequence of pure stage functions; each function returns an
//! updated context rather than mutating shared builder state.
//!
//! Responsibilities handled here:
//!
//! - **Filter placement** — WHERE terms over aggregator-tagged outputs
//!   become post filters (outermost HAVING, or WHERE without grouping);
//!   everything else is qualified against the raw schema and pushed to the
//!   innermost stage.
//! - **Group-by propagation** — every requested group column appears at
//!   the head of every stage's selector list.
//! - **Timestamp bucketing** — a dialect-generated floor expression,
//!   with any time offset folded into both the bucket expression and the
//!   fetch bounds.
//! - **Sliding-window stage insertion** — exactly when `window > step`,
//!   extending the fetch start backward by the window and recording the
//!   trim point for seed rows.
//! - **Dialect rewriting** — a final bottom-up pass over every stage's
//!   selector expressions; plan structure is already frozen by then.

use std::collections::HashSet;

use super::dialect::Dialect;
use super::schema::SchemaProvider;
use super::{
    OrderBy, PipelineStage, QueryParams, SlidingSpec, StageInput, StageKind, StagePlan,
};
use crate::config::PlannerConfig;
use crate::error::{Error, Result};
use crate::expr::{
    AggregateFunc, CmpOp, Expr, ExpressionRewriter, MacroRegistry, RewriteOutput, Selector,
    SelectorExpr,
};
use crate::types::{floor_to_step, TimeRange, Value};

// ============================================================================
// Builder
// ============================================================================

/// Compiles a [`QueryParams`] request into a [`StagePlan`]
pub struct PipelineStageBuilder<'a> {
    macros: &'a MacroRegistry,
    schema: &'a dyn SchemaProvider,
    dialect: &'a dyn Dialect,
    config: &'a PlannerConfig,
}

impl<'a> PipelineStageBuilder<'a> {
    /// Create a builder over the given collaborators
    pub fn new(
        macros: &'a MacroRegistry,
        schema: &'a dyn SchemaProvider,
        dialect: &'a dyn Dialect,
        config: &'a PlannerConfig,
    ) -> Self {
        Self {
            macros,
            schema,
            dialect,
            config,
        }
    }

    /// Compile a request into a finalized stage chain
    pub fn build(&self, params: QueryParams) -> Result<StagePlan> {
        let ctx = self.init(params)?;
        let ctx = self.split_filters(ctx)?;
        let ctx = self.add_window_stage(ctx)?;
        let ctx = self.add_aggregation_stage(ctx)?;
        let ctx = self.add_sliding_stage(ctx)?;
        let ctx = self.add_post_stage(ctx)?;
        let ctx = self.propagate_group_by(ctx);
        let ctx = self.place_filters(ctx)?;
        let ctx = self.apply_order_limit(ctx);
        let ctx = self.apply_dialect(ctx)?;
        self.finish(ctx)
    }

    // ------------------------------------------------------------------
    // Stage functions
    // ------------------------------------------------------------------

    fn init(&self, params: QueryParams) -> Result<BuildContext> {
        if params.selectors.is_empty() {
            return Err(Error::invalid_expression("query selects nothing"));
        }
        if params.selectors.len() > self.config.max_selectors {
            return Err(Error::Configuration(format!(
                "{} selectors exceeds the maximum of {}",
                params.selectors.len(),
                self.config.max_selectors
            )));
        }

        let rewriter =
            ExpressionRewriter::new(self.macros, self.schema, self.dialect, self.config);
        let rewrite = rewriter.rewrite(params.selectors.clone())?;

        let sliding = params.interval.needs_sliding_window();
        let effective = params.interval.effective_range();
        let fetch_range = if sliding {
            // The first true bucket needs a complete trailing window of
            // input behind it.
            let window = params.interval.window_ms.unwrap_or(0);
            TimeRange::new_unchecked(effective.start - window, effective.end)
        } else {
            effective
        };

        let bucket_alias = params
            .interval
            .step_ms
            .map(|_| self.config.bucket_alias.clone());

        tracing::debug!(
            source = %params.source,
            sliding,
            window_stage = rewrite.needs_window_stage,
            post_stage = rewrite.needs_post_aggregation,
            "compiling stage chain"
        );

        Ok(BuildContext {
            params,
            rewrite,
            stages: Vec::new(),
            pre_filter: Vec::new(),
            post_filter: Vec::new(),
            bucket_alias,
            fetch_range,
            trim_before_ms: None,
        })
    }

    /// Split the WHERE predicate into pre- and post-aggregation terms
    fn split_filters(&self, mut ctx: BuildContext) -> Result<BuildContext> {
        let Some(filter) = ctx.params.filter.clone() else {
            return Ok(ctx);
        };

        // Outputs produced by aggregation: filter terms over these cannot
        // run before the aggregate exists. The rewritten selectors carry
        // the tag recomputed after macro expansion.
        let mut aggregated: HashSet<String> = ctx
            .rewrite
            .selectors
            .iter()
            .filter(|s| s.aggregator_output)
            .map(|s| s.output.clone())
            .collect();
        for aggregate in &ctx.rewrite.aggregates {
            aggregated.insert(aggregate.alias.clone());
        }

        for term in filter.split_conjuncts() {
            validate_in_lists(&term)?;
            if is_post_term(&term, &aggregated) {
                ctx.post_filter.push(term);
            } else {
                ctx.pre_filter.push(self.qualify_pre_term(term)?);
            }
        }
        Ok(ctx)
    }

    /// Qualify a pre-filter term against the raw schema
    ///
    /// Every referenced identifier must resolve; stored-expression columns
    /// are substituted inline.
    fn qualify_pre_term(&self, term: Expr) -> Result<Expr> {
        term.transform(&mut |node| match node {
            Expr::Column(name) => match self.schema.resolve(&name) {
                Some(meta) => Ok(meta.expression.unwrap_or(Expr::Column(name))),
                None => Err(Error::invalid_expression(format!(
                    "unresolved identifier '{}' in filter",
                    name
                ))),
            },
            other => Ok(other),
        })
    }

    fn add_window_stage(&self, mut ctx: BuildContext) -> Result<BuildContext> {
        if !ctx.rewrite.needs_window_stage {
            return Ok(ctx);
        }

        let mut stage = PipelineStage::new(StageKind::WindowAggregation);

        // Bucket first so the partition can reference the alias and every
        // later stage can simply select it.
        let mut partition_by = ctx.params.group_by.clone();
        if let Some(bucket) = &ctx.bucket_alias {
            stage
                .selectors
                .push(Selector::expression(bucket.clone(), self.bucket_expr(&ctx)));
            partition_by.push(bucket.clone());
        }

        for aggregate in ctx.rewrite.aggregates.iter().filter(|a| a.windowed) {
            let expr = self.dialect.window_function(
                aggregate.func,
                aggregate.args.clone(),
                partition_by.clone(),
                ctx.params.timestamp_column.clone(),
            )?;
            stage
                .selectors
                .push(Selector::expression(aggregate.alias.clone(), expr));
        }

        // Columns the plain aggregates still need must survive this stage.
        for column in &ctx.rewrite.passthrough_columns {
            if !stage.selects(column) {
                stage.selectors.push(Selector::passthrough(column.clone()));
            }
        }

        ctx.stages.push(stage);
        Ok(ctx)
    }

    fn add_aggregation_stage(&self, mut ctx: BuildContext) -> Result<BuildContext> {
        let has_window_stage = !ctx.stages.is_empty();
        let mut stage = PipelineStage::new(StageKind::Aggregation);

        if let Some(bucket) = ctx.bucket_alias.clone() {
            if has_window_stage {
                stage.selectors.push(Selector::passthrough(bucket));
            } else {
                stage
                    .selectors
                    .push(Selector::expression(bucket, self.bucket_expr(&ctx)));
            }
        }

        for aggregate in &ctx.rewrite.aggregates {
            let expr = if aggregate.windowed {
                // The window stage assigned one value per partition row;
                // any row of the group carries it, so MAX collapses it.
                Expr::aggregate(AggregateFunc::Max, vec![Expr::column(&aggregate.alias)])
            } else {
                Expr::aggregate(aggregate.func, aggregate.args.clone())
            };
            stage
                .selectors
                .push(Selector::expression(aggregate.alias.clone(), expr));
        }

        // Non-aggregate expression selectors still need their raw inputs
        // carried up to the post-aggregation stage.
        if ctx.rewrite.needs_post_aggregation {
            let aliases: HashSet<&str> = ctx
                .rewrite
                .aggregates
                .iter()
                .map(|a| a.alias.as_str())
                .collect();
            for selector in &ctx.rewrite.selectors {
                if let SelectorExpr::Expr(expr) = &selector.expr {
                    for column in expr.referenced_columns() {
                        if !aliases.contains(column.as_str())
                            && !stage.selects(&column)
                            && !ctx.params.group_by.contains(&column)
                            && Some(&column) != ctx.bucket_alias.as_ref()
                        {
                            stage.selectors.push(Selector::passthrough(column));
                        }
                    }
                }
            }
        }

        stage.group_by = ctx.params.group_by.clone();
        if let Some(bucket) = &ctx.bucket_alias {
            stage.group_by.push(bucket.clone());
        }

        ctx.stages.push(stage);
        Ok(ctx)
    }

    fn add_sliding_stage(&self, mut ctx: BuildContext) -> Result<BuildContext> {
        if !ctx.params.interval.needs_sliding_window() {
            return Ok(ctx);
        }
        let Some(bucket) = ctx.bucket_alias.clone() else {
            return Err(Error::Configuration(
                "sliding window requires a step".to_string(),
            ));
        };
        let step = ctx.params.interval.step_ms.unwrap_or(0);
        let window = ctx.params.interval.window_ms.unwrap_or(0);

        // The operator's precondition: input sorted by (groups, bucket).
        if let Some(aggregation) = ctx.stages.last_mut() {
            for group in &ctx.params.group_by {
                aggregation.order_by.push(OrderBy::asc(group.clone()));
            }
            aggregation.order_by.push(OrderBy::asc(bucket.clone()));
        }

        let mut stage = PipelineStage::new(StageKind::SlidingWindow);
        stage.selectors.push(Selector::passthrough(bucket.clone()));
        for aggregate in &ctx.rewrite.aggregates {
            stage
                .selectors
                .push(Selector::passthrough(aggregate.alias.clone()));
        }
        ctx.stages.push(stage);

        // Rows fetched before the true start only seed the window; the
        // executor drops them after accumulation.
        ctx.trim_before_ms = Some(floor_to_step(ctx.params.interval.range.start, step));

        tracing::debug!(
            window_ms = window,
            step_ms = step,
            trim_before_ms = ctx.trim_before_ms,
            "sliding-window stage inserted"
        );
        Ok(ctx)
    }

    fn add_post_stage(&self, mut ctx: BuildContext) -> Result<BuildContext> {
        if !ctx.rewrite.needs_post_aggregation {
            return Ok(ctx);
        }

        let mut stage = PipelineStage::new(StageKind::PostAggregation);
        if let Some(bucket) = &ctx.bucket_alias {
            stage.selectors.push(Selector::passthrough(bucket.clone()));
        }
        for selector in &ctx.rewrite.selectors {
            if !stage.selects(&selector.output) {
                stage.selectors.push(selector.clone());
            }
        }
        ctx.stages.push(stage);
        Ok(ctx)
    }

    /// Insert requested group columns at the head of every stage
    ///
    /// Iterating the list in reverse preserves left-to-right order after
    /// repeated head insertion.
    fn propagate_group_by(&self, mut ctx: BuildContext) -> BuildContext {
        for stage in &mut ctx.stages {
            for group in ctx.params.group_by.iter().rev() {
                if !stage.selects(group) {
                    stage.selectors.insert(0, Selector::passthrough(group.clone()));
                }
            }
        }
        ctx
    }

    fn place_filters(&self, mut ctx: BuildContext) -> Result<BuildContext> {
        // Timestamp bounds always constrain the innermost fetch.
        let ts = Expr::column(&ctx.params.timestamp_column);
        let mut pre = vec![
            ts.clone().compare(
                CmpOp::Gte,
                Expr::Literal(Value::DateTime(ctx.fetch_range.start)),
            ),
            ts.compare(
                CmpOp::Lt,
                Expr::Literal(Value::DateTime(ctx.fetch_range.end)),
            ),
        ];
        pre.extend(ctx.pre_filter.clone());

        if let Some(innermost) = ctx.stages.first_mut() {
            innermost.filter = Expr::join_conjuncts(pre);
        }

        if !ctx.post_filter.is_empty() {
            let combined = Expr::join_conjuncts(ctx.post_filter.clone());
            let grouped = !ctx.params.group_by.is_empty();
            if let Some(outermost) = ctx.stages.last_mut() {
                if grouped {
                    outermost.having = combined;
                } else {
                    outermost.filter = match outermost.filter.take() {
                        Some(existing) => combined.map(|c| existing.and(c)),
                        None => combined,
                    };
                }
            }
        }
        Ok(ctx)
    }

    fn apply_order_limit(&self, mut ctx: BuildContext) -> BuildContext {
        if let Some(outermost) = ctx.stages.last_mut() {
            outermost.order_by.extend(ctx.params.order_by.clone());
            outermost.limit = ctx.params.limit;
        }
        ctx
    }

    /// Final bottom-up dialect pass over every stage's selector expressions
    ///
    /// Group-by, order, and limit are already frozen; only expression
    /// nodes may be replaced.
    fn apply_dialect(&self, mut ctx: BuildContext) -> Result<BuildContext> {
        for stage in &mut ctx.stages {
            for selector in &mut stage.selectors {
                if let SelectorExpr::Expr(expr) = &selector.expr {
                    let rewritten = expr
                        .clone()
                        .transform(&mut |node| self.dialect.rewrite_node(node))?;
                    selector.expr = SelectorExpr::Expr(rewritten);
                }
            }
        }
        Ok(ctx)
    }

    fn finish(&self, ctx: BuildContext) -> Result<StagePlan> {
        if ctx.stages.len() > self.config.max_stages {
            return Err(Error::Configuration(format!(
                "stage chain of {} exceeds the maximum of {}",
                ctx.stages.len(),
                self.config.max_stages
            )));
        }

        let sliding = if ctx.params.interval.needs_sliding_window() {
            Some(SlidingSpec {
                group_by: ctx.params.group_by.clone(),
                timestamp_column: ctx
                    .bucket_alias
                    .clone()
                    .unwrap_or_else(|| ctx.params.timestamp_column.clone()),
                value_columns: ctx
                    .rewrite
                    .aggregates
                    .iter()
                    .map(|a| a.alias.clone())
                    .collect(),
                window_ms: ctx.params.interval.window_ms.unwrap_or(0),
                trim_before_ms: ctx.trim_before_ms.unwrap_or(i64::MIN),
            })
        } else {
            None
        };

        let value_columns: Vec<String> = ctx
            .params
            .selectors
            .iter()
            .map(|s| s.output.clone())
            .filter(|name| {
                !ctx.params.group_by.contains(name) && Some(name) != ctx.bucket_alias.as_ref()
            })
            .collect();

        // Nest the chain: stage i reads stage i-1, the innermost reads the
        // raw source.
        let mut stages = ctx.stages;
        let mut iter = stages.drain(..);
        let mut root = iter
            .next()
            .ok_or_else(|| Error::Configuration("empty stage chain".to_string()))?;
        root.input = StageInput::Source(ctx.params.source.clone());
        for mut stage in iter {
            stage.input = StageInput::Stage(Box::new(root));
            root = stage;
        }

        tracing::debug!(stages = root.depth(), "stage chain finalized");

        Ok(StagePlan {
            root,
            interval: ctx.params.interval,
            bucket_alias: ctx.bucket_alias,
            group_by: ctx.params.group_by,
            value_columns,
            sliding,
        })
    }

    /// The timestamp-bucket expression, with any offset folded back in
    ///
    /// The fetch bounds were shifted by the stored (negative) offset, so
    /// subtracting that offset after flooring realigns bucket timestamps
    /// with the interval the caller asked for.
    fn bucket_expr(&self, ctx: &BuildContext) -> Expr {
        let step = ctx.params.interval.step_ms.unwrap_or(0);
        let floored = self
            .dialect
            .time_floor(Expr::column(&ctx.params.timestamp_column), step);
        match ctx.params.interval.offset_ms {
            Some(offset) => floored.sub(Expr::literal_long(offset)),
            None => floored,
        }
    }
}

// ============================================================================
// Build context
// ============================================================================

/// Accumulated state threaded through the pure stage functions
struct BuildContext {
    params: QueryParams,
    rewrite: RewriteOutput,
    /// Chain in inner-to-outer order; nested into `StageInput` at the end
    stages: Vec<PipelineStage>,
    pre_filter: Vec<Expr>,
    post_filter: Vec<Expr>,
    bucket_alias: Option<String>,
    fetch_range: TimeRange,
    trim_before_ms: Option<i64>,
}

/// Whether a filter term must run after aggregation
fn is_post_term(term: &Expr, aggregated: &HashSet<String>) -> bool {
    if let Expr::Compare { left, .. } = term {
        if let Expr::Column(name) = left.as_ref() {
            return aggregated.contains(name);
        }
    }
    term.referenced_columns()
        .iter()
        .any(|c| aggregated.contains(c))
}

/// Reject empty IN-lists anywhere in a filter term
fn validate_in_lists(term: &Expr) -> Result<()> {
    let mut empty = false;
    term.visit(&mut |node| {
        if let Expr::In { list, .. } = node {
            if list.is_empty() {
                empty = true;
            }
        }
    });
    if empty {
        return Err(Error::invalid_expression("IN predicate with empty list"));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::dialect::GenericDialect;
    use crate::plan::schema::MemorySchemaProvider;
    use crate::types::{DataType, Interval};

    struct Fixture {
        macros: MacroRegistry,
        schema: MemorySchemaProvider,
        dialect: GenericDialect,
        config: PlannerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let schema = MemorySchemaProvider::new();
            schema.define_all(&[
                ("timestamp", DataType::DateTime),
                ("host", DataType::Str),
                ("bytes", DataType::Long),
                ("price", DataType::Double),
                ("qty", DataType::Long),
            ]);
            Self {
                macros: MacroRegistry::new(),
                schema,
                dialect: GenericDialect,
                config: PlannerConfig::default(),
            }
        }

        fn build(&self, params: QueryParams) -> Result<StagePlan> {
            PipelineStageBuilder::new(&self.macros, &self.schema, &self.dialect, &self.config)
                .build(params)
        }
    }

    fn interval(start: i64, end: i64, step: i64) -> Interval {
        Interval::new(TimeRange::new_unchecked(start, end)).with_step_ms(step)
    }

    fn sum_of(column: &str) -> Expr {
        Expr::aggregate(AggregateFunc::Sum, vec![Expr::column(column)])
    }

    #[test]
    fn test_single_aggregation_stage() {
        let fixture = Fixture::new();
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("total", sum_of("bytes")))
            .with_group_by(&["host"]);

        let plan = fixture.build(params).unwrap();
        assert_eq!(plan.stage_count(), 1);
        assert_eq!(plan.root.kind, StageKind::Aggregation);
        // head: group-by, then bucket, then the aggregate
        let outputs: Vec<&str> = plan.root.selectors.iter().map(|s| s.output.as_str()).collect();
        assert_eq!(outputs, vec!["host", "_bucket", "total"]);
        assert_eq!(plan.root.group_by, vec!["host", "_bucket"]);
    }

    #[test]
    fn test_ratio_compiles_to_two_stages() {
        // round(sum(a)/sum(b), 2) -> aggregation computes a, b;
        // post-aggregation computes round(a/b, 2)
        let fixture = Fixture::new();
        fixture.schema.define_all(&[("a", DataType::Double), ("b", DataType::Double)]);

        let expr = Expr::call(
            "round",
            vec![sum_of("a").div(sum_of("b")), Expr::literal_long(2)],
        );
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("ratio", expr));

        let plan = fixture.build(params).unwrap();
        assert_eq!(plan.stage_count(), 2);
        assert_eq!(plan.root.kind, StageKind::PostAggregation);

        let StageInput::Stage(inner) = &plan.root.input else {
            panic!("post stage must nest the aggregation stage");
        };
        assert_eq!(inner.kind, StageKind::Aggregation);
        assert!(inner.selects("a"));
        assert!(inner.selects("b"));
        assert!(plan.root.selects("ratio"));

        let rendered = plan.render();
        assert!(rendered.contains("sum(a) AS a"));
        assert!(rendered.contains("sum(b) AS b"));
        assert!(rendered.contains("round((a / b), 2) AS ratio"));
    }

    #[test]
    fn test_filter_split_pre_and_post() {
        let fixture = Fixture::new();
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("total", sum_of("bytes")))
            .with_group_by(&["host"])
            .with_filter(
                Expr::column("host")
                    .compare(CmpOp::Eq, Expr::literal_str("web-1"))
                    .and(Expr::column("total").compare(CmpOp::Gt, Expr::literal_long(100))),
            );

        let plan = fixture.build(params).unwrap();

        // Pre filter (plus time bounds) on the innermost WHERE
        let filter = plan.root.filter.as_ref().unwrap().to_string();
        assert!(filter.contains("host = 'web-1'"));
        assert!(filter.contains("timestamp >="));

        // Post filter in HAVING because a group-by exists
        let having = plan.root.having.as_ref().unwrap().to_string();
        assert_eq!(having, "total > 100");
    }

    #[test]
    fn test_post_filter_lands_in_where_without_grouping() {
        let fixture = Fixture::new();
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("total", sum_of("bytes")))
            .with_filter(Expr::column("total").compare(CmpOp::Gt, Expr::literal_long(100)));

        let plan = fixture.build(params).unwrap();
        assert!(plan.root.having.is_none());
        assert!(plan
            .root
            .filter
            .as_ref()
            .unwrap()
            .to_string()
            .contains("total > 100"));
    }

    #[test]
    fn test_unresolved_pre_filter_identifier_rejected() {
        let fixture = Fixture::new();
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("total", sum_of("bytes")))
            .with_filter(Expr::column("no_such_column").compare(CmpOp::Gt, Expr::literal_long(1)));

        let err = fixture.build(params).unwrap_err();
        assert!(matches!(err, Error::InvalidExpression(_)));
    }

    #[test]
    fn test_empty_in_list_rejected() {
        let fixture = Fixture::new();
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("total", sum_of("bytes")))
            .with_filter(Expr::In {
                expr: Box::new(Expr::column("host")),
                list: Vec::new(),
            });

        let err = fixture.build(params).unwrap_err();
        assert!(matches!(err, Error::InvalidExpression(_)));
    }

    #[test]
    fn test_sliding_window_chain() {
        let fixture = Fixture::new();
        let iv = Interval::new(TimeRange::new_unchecked(600_000, 1_200_000))
            .with_step_ms(60_000)
            .with_window_ms(300_000);
        let params = QueryParams::new("metrics", iv)
            .select(Selector::expression("total", sum_of("bytes")))
            .with_group_by(&["host"]);

        let plan = fixture.build(params).unwrap();
        assert_eq!(plan.stage_count(), 2);
        assert_eq!(plan.root.kind, StageKind::SlidingWindow);

        let StageInput::Stage(aggregation) = &plan.root.input else {
            panic!("sliding stage must nest the aggregation stage");
        };
        // Fetch start extended backward by the window
        let filter = aggregation.filter.as_ref().unwrap().to_string();
        assert!(filter.contains(&format!("timestamp >= {}", 600_000 - 300_000)));
        // Sorted for the two-pointer pass
        let order: Vec<&str> = aggregation.order_by.iter().map(|o| o.column.as_str()).collect();
        assert_eq!(order, vec!["host", "_bucket"]);

        let sliding = plan.sliding.as_ref().unwrap();
        assert_eq!(sliding.window_ms, 300_000);
        assert_eq!(sliding.trim_before_ms, 600_000);
        assert_eq!(sliding.value_columns, vec!["total"]);
        assert_eq!(sliding.timestamp_column, "_bucket");
    }

    #[test]
    fn test_offset_folds_into_bounds_and_bucket() {
        let fixture = Fixture::new();
        let iv = interval(600_000, 1_200_000, 60_000).with_offset_ms(-300_000);
        let params = QueryParams::new("metrics", iv)
            .select(Selector::expression("total", sum_of("bytes")));

        let plan = fixture.build(params).unwrap();

        // Bounds shifted into the past by the stored negative offset
        let filter = plan.root.filter.as_ref().unwrap().to_string();
        assert!(filter.contains("timestamp >= 300000"));
        assert!(filter.contains("timestamp < 900000"));

        // Bucket realigned by subtracting the negative offset
        let bucket = plan
            .root
            .selectors
            .iter()
            .find(|s| s.output == "_bucket")
            .unwrap();
        assert_eq!(
            bucket.as_expr().to_string(),
            "(time_floor(timestamp, 60000) - -300000)"
        );
    }

    #[test]
    fn test_window_stage_projects_passthrough_columns() {
        let fixture = Fixture::new();
        let params = QueryParams::new("trades", interval(0, 600_000, 60_000))
            .select(Selector::expression(
                "open",
                Expr::aggregate(AggregateFunc::First, vec![Expr::column("price")]),
            ))
            .select(Selector::expression("volume", sum_of("qty")))
            .with_group_by(&["host"]);

        let plan = fixture.build(params).unwrap();
        assert_eq!(plan.stage_count(), 2);
        assert_eq!(plan.root.kind, StageKind::Aggregation);

        let StageInput::Stage(window) = &plan.root.input else {
            panic!("aggregation must nest the window stage");
        };
        assert_eq!(window.kind, StageKind::WindowAggregation);
        // qty rides through for the plain sum upstairs
        assert!(window.selects("qty"));
        // group columns propagate into every stage
        assert!(window.selects("host"));
        assert!(window.selects("_bucket"));

        let rendered = plan.render();
        assert!(rendered.contains("OVER (PARTITION BY host, _bucket ORDER BY timestamp)"));
        // windowed value collapses via max in the aggregation stage
        assert!(rendered.contains("max(open) AS open"));
    }

    #[test]
    fn test_group_by_order_preserved_after_head_insertion() {
        let fixture = Fixture::new();
        fixture.schema.define_all(&[("dc", DataType::Str)]);
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("total", sum_of("bytes")))
            .with_group_by(&["dc", "host"]);

        let plan = fixture.build(params).unwrap();
        let outputs: Vec<&str> = plan.root.selectors.iter().map(|s| s.output.as_str()).collect();
        assert_eq!(outputs, vec!["dc", "host", "_bucket", "total"]);
        assert_eq!(plan.root.group_by, vec!["dc", "host", "_bucket"]);
    }

    #[test]
    fn test_order_and_limit_on_outermost_stage() {
        let fixture = Fixture::new();
        let expr = sum_of("bytes").div(Expr::literal_long(60));
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("rate", expr))
            .with_order(OrderBy::desc("rate"))
            .with_limit(10);

        let plan = fixture.build(params).unwrap();
        assert_eq!(plan.root.kind, StageKind::PostAggregation);
        assert_eq!(plan.root.limit, Some(10));
        assert_eq!(plan.root.order_by.len(), 1);

        let StageInput::Stage(inner) = &plan.root.input else {
            panic!()
        };
        assert!(inner.limit.is_none());
        assert!(inner.order_by.is_empty());
    }

    #[test]
    fn test_value_columns_exclude_keys() {
        let fixture = Fixture::new();
        let params = QueryParams::new("metrics", interval(0, 600_000, 60_000))
            .select(Selector::expression("total", sum_of("bytes")))
            .with_group_by(&["host"]);

        let plan = fixture.build(params).unwrap();
        assert_eq!(plan.value_columns, vec!["total"]);
        assert_eq!(plan.group_by, vec!["host"]);
        assert_eq!(plan.bucket_alias.as_deref(), Some("_bucket"));
    }
}
