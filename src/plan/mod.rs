//! Staged query plans
//!
//! A metric query compiles into an ordered chain of nested stages, each
//! analogous to one nested SELECT:
//!
//! ```text
//! [window-aggregation?] → aggregation → [sliding-window?] → [post-aggregation?]
//! ```
//!
//! Stage *i* takes stage *i-1* as its data source; the innermost stage
//! reads the raw source table. Stages are immutable once the chain is
//! finalized; execution against storage happens outside this crate, with
//! the sliding-window stage handled locally by
//! [`crate::ops::SlidingWindowStep`] over the returned columnar rows.

pub mod builder;
pub mod dialect;
pub mod schema;

pub use builder::PipelineStageBuilder;
pub use dialect::{Dialect, GenericDialect};
pub use schema::{ColumnMeta, MemorySchemaProvider, SchemaProvider};

use std::fmt;

use crate::expr::{Expr, Selector, SelectorExpr};
use crate::types::Interval;

// ============================================================================
// Stage types
// ============================================================================

/// The role a stage plays in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Renders first/last style aggregates as window functions
    WindowAggregation,
    /// GROUP BY aggregation over the raw or window-projected rows
    Aggregation,
    /// Trailing-window summation, executed locally after fetch
    SlidingWindow,
    /// Arithmetic over already-aggregated values
    PostAggregation,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::WindowAggregation => write!(f, "window-aggregation"),
            StageKind::Aggregation => write!(f, "aggregation"),
            StageKind::SlidingWindow => write!(f, "sliding-window"),
            StageKind::PostAggregation => write!(f, "post-aggregation"),
        }
    }
}

/// Sort direction for ORDER BY entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// One ORDER BY entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to sort on
    pub column: String,
    /// Direction
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Ascending order on a column
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Descending order on a column
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Where a stage reads its rows from
#[derive(Debug, Clone)]
pub enum StageInput {
    /// The raw source table, by data-source name
    Source(String),
    /// The next inner stage
    Stage(Box<PipelineStage>),
}

/// One stage in the compiled chain
#[derive(Debug, Clone)]
pub struct PipelineStage {
    /// The role of this stage
    pub kind: StageKind,

    /// Output selectors in order
    pub selectors: Vec<Selector>,

    /// WHERE predicate
    pub filter: Option<Expr>,

    /// HAVING predicate (post-aggregation filter over grouped output)
    pub having: Option<Expr>,

    /// GROUP BY column list
    pub group_by: Vec<String>,

    /// ORDER BY entries
    pub order_by: Vec<OrderBy>,

    /// Row limit
    pub limit: Option<usize>,

    /// Upstream data source
    pub input: StageInput,
}

impl PipelineStage {
    /// Create a bare stage of a kind reading from a source placeholder
    ///
    /// The builder rewires inputs when it finalizes the chain.
    pub(crate) fn new(kind: StageKind) -> Self {
        Self {
            kind,
            selectors: Vec::new(),
            filter: None,
            having: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            input: StageInput::Source(String::new()),
        }
    }

    /// Whether a selector with this output name exists
    pub fn selects(&self, output: &str) -> bool {
        self.selectors.iter().any(|s| s.output == output)
    }

    /// Depth of the chain rooted at this stage (1 for an innermost stage)
    pub fn depth(&self) -> usize {
        match &self.input {
            StageInput::Source(_) => 1,
            StageInput::Stage(inner) => 1 + inner.depth(),
        }
    }

    fn render_into(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        out.push_str(&format!("{}Stage[{}]\n", pad, self.kind));

        let selected: Vec<String> = self
            .selectors
            .iter()
            .map(|s| match &s.expr {
                SelectorExpr::Column(name) if name == &s.output => name.clone(),
                SelectorExpr::Column(name) => format!("{} AS {}", name, s.output),
                SelectorExpr::Expr(expr) => format!("{} AS {}", expr, s.output),
            })
            .collect();
        out.push_str(&format!("{}  SELECT {}\n", pad, selected.join(", ")));

        match &self.input {
            StageInput::Source(name) => {
                out.push_str(&format!("{}  FROM {}\n", pad, name));
            }
            StageInput::Stage(inner) => {
                out.push_str(&format!("{}  FROM (\n", pad));
                inner.render_into(out, indent + 2);
                out.push_str(&format!("{}  )\n", pad));
            }
        }

        if let Some(filter) = &self.filter {
            out.push_str(&format!("{}  WHERE {}\n", pad, filter));
        }
        if !self.group_by.is_empty() {
            out.push_str(&format!("{}  GROUP BY {}\n", pad, self.group_by.join(", ")));
        }
        if let Some(having) = &self.having {
            out.push_str(&format!("{}  HAVING {}\n", pad, having));
        }
        if !self.order_by.is_empty() {
            let entries: Vec<String> = self
                .order_by
                .iter()
                .map(|o| format!("{} {}", o.column, o.direction))
                .collect();
            out.push_str(&format!("{}  ORDER BY {}\n", pad, entries.join(", ")));
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!("{}  LIMIT {}\n", pad, limit));
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        write!(f, "{}", out)
    }
}

// ============================================================================
// Plan and parameters
// ============================================================================

/// Parameters of the sliding-window stage the executor runs locally
#[derive(Debug, Clone)]
pub struct SlidingSpec {
    /// Group columns; a key change resets the window
    pub group_by: Vec<String>,

    /// The bucket timestamp column the window slides over
    pub timestamp_column: String,

    /// Value columns accumulated by the trailing window
    pub value_columns: Vec<String>,

    /// Trailing window width in milliseconds
    pub window_ms: i64,

    /// Output rows with bucket timestamps before this point exist only to
    /// seed the window and are dropped
    pub trim_before_ms: i64,
}

/// A finalized stage chain plus the execution metadata around it
#[derive(Debug, Clone)]
pub struct StagePlan {
    /// Outermost stage of the chain
    pub root: PipelineStage,

    /// The requested interval (unshifted, as the caller asked)
    pub interval: Interval,

    /// Output name of the timestamp-bucket column, when bucketing applies
    pub bucket_alias: Option<String>,

    /// Requested group-by columns
    pub group_by: Vec<String>,

    /// Output value column names in selector order
    pub value_columns: Vec<String>,

    /// Present when the plan carries a sliding-window stage
    pub sliding: Option<SlidingSpec>,
}

impl StagePlan {
    /// Number of stages in the chain
    pub fn stage_count(&self) -> usize {
        self.root.depth()
    }

    /// Human-readable rendering of the chain for diagnostics
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.root.render_into(&mut out, 0);
        out
    }
}

/// A metric query request: what to select, over what, grouped how
///
/// Built with the `with_*` methods and handed to
/// [`PipelineStageBuilder::build`].
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// Data-source (table) name
    pub source: String,

    /// Requested output selectors
    pub selectors: Vec<Selector>,

    /// WHERE predicate over raw and aggregated columns
    pub filter: Option<Expr>,

    /// Group-by column names
    pub group_by: Vec<String>,

    /// Time parameters
    pub interval: Interval,

    /// Result ordering on the outermost stage
    pub order_by: Vec<OrderBy>,

    /// Result limit on the outermost stage
    pub limit: Option<usize>,

    /// Name of the raw timestamp column
    pub timestamp_column: String,
}

impl QueryParams {
    /// Create a request against a source over an interval
    pub fn new(source: impl Into<String>, interval: Interval) -> Self {
        Self {
            source: source.into(),
            selectors: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            interval,
            order_by: Vec::new(),
            limit: None,
            timestamp_column: "timestamp".to_string(),
        }
    }

    /// Add an output selector
    pub fn select(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// Set the WHERE predicate
    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set group-by columns
    pub fn with_group_by(mut self, columns: &[&str]) -> Self {
        self.group_by = columns.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Add an ORDER BY entry
    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the row limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Override the raw timestamp column name
    pub fn with_timestamp_column(mut self, name: impl Into<String>) -> Self {
        self.timestamp_column = name.into();
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
