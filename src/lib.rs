//! Metriq - analytical query core for an observability metrics backend
//!
//! This library compiles declarative time-series queries into staged
//! execution plans and evaluates composite metric expressions over
//! columnar result sets:
//! - Aggregator extraction and macro substitution over parsed expressions
//! - Multi-stage plan assembly (window, aggregation, sliding-window,
//!   post-aggregation) with filter pushdown and group-by propagation
//! - Dense columnar tables with no-copy full selections
//! - Amortized O(rows) trailing-window summation
//! - Async composite evaluation with scalar broadcasting, hash-join
//!   combination, and at-most-once leaf execution
//!
//! # Architecture
//!
//! ```text
//! Selector list + filters + interval
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ ExpressionRewriter│  macros → aggregator extraction → stage detection
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ PipelineStage    │  [window?] → aggregation → [sliding?] → [post?]
//! │ Builder          │
//! └────────┬─────────┘
//!          ▼
//!   (storage collaborator executes the chain)
//!          │
//!          ▼
//! ┌──────────────────┐      ┌──────────────────────┐
//! │ ColumnarTable    │ ───▶ │ SlidingWindowStep /  │
//! │                  │      │ FilterStep           │
//! └──────────────────┘      └──────────────────────┘
//!
//! Metric expression (a ⊕ b over named queries)
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ CompositeEvaluator│  concurrent leaves, memoized, broadcast/hash-join
//! └──────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;

/// Dense columnar storage: tables, columns, composite keys
pub mod table;

/// Expression AST, macro substitution, and aggregator extraction
pub mod expr;

/// Staged plan construction with dialect and schema collaborators
pub mod plan;

/// Physical operators over columnar tables
pub mod ops;

/// Composite metric expression evaluation
pub mod eval;

/// Storage collaborator boundary
pub mod source;

// Re-export main types
pub use config::{EngineConfig, EvaluatorConfig, PlannerConfig};
pub use error::{Error, Result};
pub use eval::{CompositeEvaluator, Condition, EvalNode};
pub use expr::{AggregateFunc, BinaryOp, CmpOp, Expr, MacroRegistry, Selector};
pub use ops::{CompareOp, FilterStep, SlidingWindowStep};
pub use plan::{
    Dialect, GenericDialect, MemorySchemaProvider, OrderBy, PipelineStage, PipelineStageBuilder,
    QueryParams, SchemaProvider, StagePlan,
};
pub use source::{EvalResult, InMemorySource, MetricSource, SourceRequest};
pub use table::{Column, ColumnarTable, CompositeKey};
pub use types::{DataType, Interval, TimeRange, Value};
