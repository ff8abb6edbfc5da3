//! Logical expression rewriting
//!
//! Turns a selector list whose expressions mix aggregate calls with
//! arbitrary arithmetic into the flat form the stage builder needs:
//!
//! 1. **Macro substitution** — named placeholders are expanded first,
//!    because a macro body may itself contain aggregate calls that the
//!    next step must see. Stored-expression columns resolved through the
//!    schema provider are inlined the same way.
//! 2. **Aggregator extraction** — every aggregate call is pulled out under
//!    a generated alias and its call site replaced by a column reference
//!    to that alias. Aggregates nested inside other aggregates are
//!    rejected; aggregation is not composable in one pass.
//! 3. **Post-aggregation detection** — any selector whose top-level
//!    expression is not a bare aggregate call forces a post-aggregation
//!    stage.
//! 4. **Window-aggregator detection** — aggregates the dialect must render
//!    as window functions force a window-aggregation stage, and columns
//!    used by the remaining aggregates are projected through it.

use std::collections::HashMap;

use super::{AggregateFunc, Expr, Selector, SelectorExpr};
use crate::config::PlannerConfig;
use crate::error::{Error, Result};
use crate::expr::macros::MacroRegistry;
use crate::plan::dialect::Dialect;
use crate::plan::schema::SchemaProvider;

// ============================================================================
// Output types
// ============================================================================

/// One aggregate call pulled out of a selector expression
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAggregate {
    /// Output alias the aggregate is computed under
    pub alias: String,

    /// The aggregate function
    pub func: AggregateFunc,

    /// Original argument expressions
    pub args: Vec<Expr>,

    /// Whether the dialect renders this aggregate as a window function
    pub windowed: bool,
}

/// Result of rewriting a selector list
#[derive(Debug, Clone)]
pub struct RewriteOutput {
    /// Selectors with aggregate call sites replaced by alias references;
    /// these become the post-aggregation stage's selector list
    pub selectors: Vec<Selector>,

    /// Extracted aggregates in first-seen order
    pub aggregates: Vec<ExtractedAggregate>,

    /// Whether arithmetic around (or absence of) aggregates requires a
    /// post-aggregation stage
    pub needs_post_aggregation: bool,

    /// Whether any aggregate must be rendered as a window function
    pub needs_window_stage: bool,

    /// Raw columns referenced by non-window aggregates, which the window
    /// stage must project so later stages can still reference them
    pub passthrough_columns: Vec<String>,
}

// ============================================================================
// Rewriter
// ============================================================================

/// Rewrites selector expressions ahead of stage construction
pub struct ExpressionRewriter<'a> {
    macros: &'a MacroRegistry,
    schema: &'a dyn SchemaProvider,
    dialect: &'a dyn Dialect,
    config: &'a PlannerConfig,
}

impl<'a> ExpressionRewriter<'a> {
    /// Create a rewriter over the given collaborators
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

    /// Run the full rewrite over a selector list
    pub fn rewrite(&self, selectors: Vec<Selector>) -> Result<RewriteOutput> {
        // Phase 1: macro substitution and stored-expression inlining, so
        // extraction sees the final tree shape.
        let expanded: Vec<Selector> = selectors
            .into_iter()
            .map(|s| self.expand_selector(s))
            .collect::<Result<_>>()?;

        for selector in &expanded {
            if let SelectorExpr::Expr(expr) = &selector.expr {
                reject_nested_aggregates(expr)?;
            }
        }

        // Phase 2: a post-aggregation stage is needed as soon as any
        // selector expression is more than a bare aggregate call.
        let needs_post_aggregation = expanded.iter().any(|s| match &s.expr {
            SelectorExpr::Column(_) => false,
            SelectorExpr::Expr(Expr::Aggregate { .. }) => false,
            SelectorExpr::Expr(_) => true,
        });

        // Phase 3: extraction.
        let mut state = ExtractState::new(needs_post_aggregation, self.config);
        let mut rewritten = Vec::with_capacity(expanded.len());
        for selector in expanded {
            rewritten.push(state.extract_selector(selector)?);
        }

        // Phase 4: window-aggregator detection.
        let mut aggregates = state.aggregates;
        let mut needs_window_stage = false;
        for aggregate in &mut aggregates {
            aggregate.windowed = self.dialect.requires_window_function(&aggregate.func);
            needs_window_stage |= aggregate.windowed;
        }

        let mut passthrough_columns = Vec::new();
        if needs_window_stage {
            for aggregate in aggregates.iter().filter(|a| !a.windowed) {
                for arg in &aggregate.args {
                    for column in arg.referenced_columns() {
                        if !passthrough_columns.contains(&column) {
                            passthrough_columns.push(column);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            aggregates = aggregates.len(),
            post_aggregation = needs_post_aggregation,
            window_stage = needs_window_stage,
            "selector rewrite complete"
        );

        Ok(RewriteOutput {
            selectors: rewritten,
            aggregates,
            needs_post_aggregation,
            needs_window_stage,
            passthrough_columns,
        })
    }

    /// Expand macros and inline stored-expression columns in one selector
    fn expand_selector(&self, selector: Selector) -> Result<Selector> {
        let Selector {
            output,
            expr,
            aggregator_output,
        } = selector;
        match expr {
            SelectorExpr::Column(name) => Ok(Selector {
                output,
                expr: SelectorExpr::Column(name),
                aggregator_output,
            }),
            SelectorExpr::Expr(expr) => {
                let expanded = self.macros.expand(expr)?;
                let inlined = self.inline_stored_expressions(expanded)?;
                let aggregator_output = inlined.contains_aggregate();
                Ok(Selector {
                    output,
                    expr: SelectorExpr::Expr(inlined),
                    aggregator_output,
                })
            }
        }
    }

    /// Replace references to stored-expression columns with their bodies
    fn inline_stored_expressions(&self, expr: Expr) -> Result<Expr> {
        expr.transform(&mut |node| match node {
            Expr::Column(name) => match self.schema.resolve(&name) {
                Some(meta) => match meta.expression {
                    Some(body) => Ok(body),
                    None => Ok(Expr::Column(name)),
                },
                // Aggregate aliases and computed outputs resolve later
                None => Ok(Expr::Column(name)),
            },
            other => Ok(other),
        })
    }
}

/// Reject aggregates nested inside other aggregates
fn reject_nested_aggregates(expr: &Expr) -> Result<()> {
    let mut nested: Option<String> = None;
    expr.visit(&mut |node| {
        if let Expr::Aggregate { args, .. } = node {
            for arg in args {
                if nested.is_none() && arg.contains_aggregate() {
                    nested = Some(node.to_string());
                }
            }
        }
    });
    match nested {
        Some(call) => Err(Error::invalid_expression(format!(
            "aggregate nested inside another aggregate: {}",
            call
        ))),
        None => Ok(()),
    }
}

// ============================================================================
// Extraction state
// ============================================================================

/// Accumulates extracted aggregates and generates aliases
struct ExtractState {
    needs_post_aggregation: bool,
    alias_prefix: String,
    aggregates: Vec<ExtractedAggregate>,
    // (func, args) -> index into aggregates, so a repeated identical call
    // shares one computed column
    dedupe: HashMap<String, usize>,
    used_aliases: Vec<String>,
    counter: usize,
}

impl ExtractState {
    fn new(needs_post_aggregation: bool, config: &PlannerConfig) -> Self {
        Self {
            needs_post_aggregation,
            alias_prefix: config.synthetic_alias_prefix.clone(),
            aggregates: Vec::new(),
            dedupe: HashMap::new(),
            used_aliases: Vec::new(),
            counter: 0,
        }
    }

    fn extract_selector(&mut self, selector: Selector) -> Result<Selector> {
        let Selector {
            output,
            expr,
            aggregator_output,
        } = selector;
        match expr {
            SelectorExpr::Column(name) => Ok(Selector {
                output,
                expr: SelectorExpr::Column(name),
                aggregator_output,
            }),
            SelectorExpr::Expr(expr) => {
                let rewritten = expr.transform(&mut |node| match node {
                    Expr::Aggregate { func, args } => {
                        let alias = self.record(&output, func, args);
                        Ok(Expr::Column(alias))
                    }
                    other => Ok(other),
                })?;
                Ok(Selector {
                    output,
                    expr: SelectorExpr::Expr(rewritten),
                    aggregator_output,
                })
            }
        }
    }

    fn record(&mut self, selector_output: &str, func: AggregateFunc, args: Vec<Expr>) -> String {
        if self.needs_post_aggregation {
            let key = format!("{}|{:?}", func.name(), args);
            if let Some(&at) = self.dedupe.get(&key) {
                return self.aggregates[at].alias.clone();
            }
            let alias = self.post_aggregation_alias(&func, &args);
            self.dedupe.insert(key, self.aggregates.len());
            self.push(alias, func, args)
        } else {
            // Identity passthrough: the aggregate is the whole selector,
            // so the alias is the selector's own output name.
            self.push(selector_output.to_string(), func, args)
        }
    }

    fn post_aggregation_alias(&mut self, func: &AggregateFunc, args: &[Expr]) -> String {
        if func.is_cardinality() {
            // A distinct count named after its argument column would shadow
            // the underlying value column in the outer stage.
            return self.synthetic();
        }
        if let [Expr::Column(name)] = args {
            if !self.used_aliases.iter().any(|a| a == name) {
                return name.clone();
            }
        }
        self.synthetic()
    }

    fn synthetic(&mut self) -> String {
        loop {
            let candidate = format!("{}{}", self.alias_prefix, self.counter);
            self.counter += 1;
            if !self.used_aliases.iter().any(|a| a == &candidate) {
                return candidate;
            }
        }
    }

    fn push(&mut self, alias: String, func: AggregateFunc, args: Vec<Expr>) -> String {
        self.used_aliases.push(alias.clone());
        self.aggregates.push(ExtractedAggregate {
            alias: alias.clone(),
            func,
            args,
            windowed: false,
        });
        alias
    }
}

// ============================================================================
// Tests
// ============================================================================
