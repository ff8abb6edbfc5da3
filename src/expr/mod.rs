//! Metric expression AST
//!
//! The closed sum-type expression tree this core consumes. The
//! expression-text grammar that produces it is an external collaborator;
//! everything here operates on already-parsed trees.
//!
//! The module also provides the generic bottom-up [`Expr::transform`]
//! utility used by macro substitution, aggregator extraction, and
//! dialect-driven rewriting: children are rebuilt first, then the handler
//! runs on the rebuilt node and may replace it.
//!
//! # Example
//!
//! ```rust
//! use metriq::expr::{AggregateFunc, Expr};
//!
//! // round(sum(a) / sum(b), 2)
//! let expr = Expr::call(
//!     "round",
//!     vec![
//!         Expr::aggregate(AggregateFunc::Sum, vec![Expr::column("a")])
//!             .div(Expr::aggregate(AggregateFunc::Sum, vec![Expr::column("b")])),
//!         Expr::literal_long(2),
//!     ],
//! );
//! assert!(expr.contains_aggregate());
//! assert_eq!(expr.to_string(), "round((sum(a) / sum(b)), 2)");
//! ```

pub mod macros;
pub mod rewrite;

pub use macros::MacroRegistry;
pub use rewrite::{ExpressionRewriter, ExtractedAggregate, RewriteOutput};

use std::fmt;

use crate::error::Result;
use crate::types::Value;

// ============================================================================
// Operators and aggregate functions
// ============================================================================

/// Arithmetic operators over metric values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

impl BinaryOp {
    /// Operator symbol for rendering
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Comparison operators used in filter predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
}

impl CmpOp {
    /// Operator symbol for rendering
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
        }
    }
}

/// Aggregate functions: evaluation collapses multiple rows into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    /// Sum of values
    Sum,
    /// Count of rows
    Count,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Arithmetic mean
    Avg,
    /// First value by timestamp
    First,
    /// Last value by timestamp
    Last,
    /// Count of distinct values
    CountDistinct,
}

impl AggregateFunc {
    /// Function name for rendering
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Sum => "sum",
            AggregateFunc::Count => "count",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::Avg => "avg",
            AggregateFunc::First => "first",
            AggregateFunc::Last => "last",
            AggregateFunc::CountDistinct => "count_distinct",
        }
    }

    /// Whether this is a cardinality-style distinct count
    ///
    /// Such aggregates always get a synthetic alias so the output column
    /// is never confused with the underlying distinct-count column.
    pub fn is_cardinality(&self) -> bool {
        matches!(self, AggregateFunc::CountDistinct)
    }

    /// Whether this aggregate depends on row order within the group
    pub fn is_positional(&self) -> bool {
        matches!(self, AggregateFunc::First | AggregateFunc::Last)
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Expression tree
// ============================================================================

/// A parsed metric expression
///
/// A closed sum type: every transformation in this crate is written as a
/// match over these variants, so adding a variant is a deliberate,
/// compiler-checked change.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to an output or raw column by name
    Column(String),

    /// A constant
    Literal(Value),

    /// Arithmetic over two sub-expressions
    Binary {
        /// The operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },

    /// Comparison predicate
    Compare {
        /// The comparison operator
        op: CmpOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },

    /// Logical conjunction
    And(Box<Expr>, Box<Expr>),

    /// Logical disjunction
    Or(Box<Expr>, Box<Expr>),

    /// Membership test; an empty list is rejected at compile time
    In {
        /// The probed expression
        expr: Box<Expr>,
        /// The candidate values
        list: Vec<Expr>,
    },

    /// Scalar function call (e.g. `round`, `abs`, `time_floor`)
    Call {
        /// Function name
        name: String,
        /// Arguments
        args: Vec<Expr>,
    },

    /// Aggregate function call
    Aggregate {
        /// The aggregate function
        func: AggregateFunc,
        /// Arguments
        args: Vec<Expr>,
    },

    /// An aggregate rendered as a window function over a partition
    ///
    /// Produced by the plan builder for aggregates the backend cannot
    /// express as a plain GROUP BY aggregate (first/last value semantics).
    WindowFunction {
        /// The underlying aggregate
        func: AggregateFunc,
        /// Arguments
        args: Vec<Expr>,
        /// Partitioning columns
        partition_by: Vec<String>,
        /// Ordering column within the partition
        order_by: String,
    },

    /// A named macro placeholder, expanded before aggregator extraction
    Macro(String),
}

impl Expr {
    /// Column reference
    pub fn column(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    /// LONG literal
    pub fn literal_long(v: i64) -> Expr {
        Expr::Literal(Value::Long(v))
    }

    /// DOUBLE literal
    pub fn literal_double(v: f64) -> Expr {
        Expr::Literal(Value::Double(v))
    }

    /// STRING literal
    pub fn literal_str(v: impl Into<String>) -> Expr {
        Expr::Literal(Value::Str(v.into()))
    }

    /// Scalar function call
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    /// Aggregate call
    pub fn aggregate(func: AggregateFunc, args: Vec<Expr>) -> Expr {
        Expr::Aggregate { func, args }
    }

    /// Binary arithmetic node
    pub fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// `self + right`
    pub fn add(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Add, right)
    }

    /// `self - right`
    pub fn sub(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Sub, right)
    }

    /// `self * right`
    pub fn mul(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Mul, right)
    }

    /// `self / right`
    pub fn div(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Div, right)
    }

    /// Comparison node
    pub fn compare(self, op: CmpOp, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// `self AND right`
    pub fn and(self, right: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(right))
    }

    /// Rebuild the tree bottom-up through a handler
    ///
    /// Children are transformed first; the handler then receives the
    /// rebuilt node and may return it unchanged or replace it. This is the
    /// single rewriting primitive shared by macro substitution, aggregator
    /// extraction, and dialect rewriting.
    pub fn transform<F>(self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        let rebuilt = match self {
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(left.transform(f)?),
                right: Box::new(right.transform(f)?),
            },
            Expr::Compare { op, left, right } => Expr::Compare {
                op,
                left: Box::new(left.transform(f)?),
                right: Box::new(right.transform(f)?),
            },
            Expr::And(left, right) => {
                Expr::And(Box::new(left.transform(f)?), Box::new(right.transform(f)?))
            }
            Expr::Or(left, right) => {
                Expr::Or(Box::new(left.transform(f)?), Box::new(right.transform(f)?))
            }
            Expr::In { expr, list } => Expr::In {
                expr: Box::new(expr.transform(f)?),
                list: list
                    .into_iter()
                    .map(|e| e.transform(f))
                    .collect::<Result<Vec<_>>>()?,
            },
            Expr::Call { name, args } => Expr::Call {
                name,
                args: args
                    .into_iter()
                    .map(|e| e.transform(f))
                    .collect::<Result<Vec<_>>>()?,
            },
            Expr::Aggregate { func, args } => Expr::Aggregate {
                func,
                args: args
                    .into_iter()
                    .map(|e| e.transform(f))
                    .collect::<Result<Vec<_>>>()?,
            },
            Expr::WindowFunction {
                func,
                args,
                partition_by,
                order_by,
            } => Expr::WindowFunction {
                func,
                args: args
                    .into_iter()
                    .map(|e| e.transform(f))
                    .collect::<Result<Vec<_>>>()?,
                partition_by,
                order_by,
            },
            leaf @ (Expr::Column(_) | Expr::Literal(_) | Expr::Macro(_)) => leaf,
        };
        f(rebuilt)
    }

    /// Walk the tree preorder, calling `f` on every node
    pub fn visit<'e, F>(&'e self, f: &mut F)
    where
        F: FnMut(&'e Expr),
    {
        f(self);
        match self {
            Expr::Binary { left, right, .. } | Expr::Compare { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.visit(f);
                right.visit(f);
            }
            Expr::In { expr, list } => {
                expr.visit(f);
                for item in list {
                    item.visit(f);
                }
            }
            Expr::Call { args, .. }
            | Expr::Aggregate { args, .. }
            | Expr::WindowFunction { args, .. } => {
                for arg in args {
                    arg.visit(f);
                }
            }
            Expr::Column(_) | Expr::Literal(_) | Expr::Macro(_) => {}
        }
    }

    /// Whether any aggregate call appears anywhere in the tree
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if matches!(node, Expr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    /// All column names referenced anywhere in the tree, in first-seen order
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut seen = Vec::new();
        self.visit(&mut |node| {
            if let Expr::Column(name) = node {
                if !seen.iter().any(|s| s == name) {
                    seen.push(name.clone());
                }
            }
        });
        seen
    }

    /// Split a conjunction into its AND-ed terms
    pub fn split_conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::And(left, right) => {
                let mut terms = left.split_conjuncts();
                terms.extend(right.split_conjuncts());
                terms
            }
            other => vec![other],
        }
    }

    /// Combine terms back into a single AND chain (None when empty)
    pub fn join_conjuncts(terms: Vec<Expr>) -> Option<Expr> {
        terms.into_iter().reduce(|acc, term| acc.and(term))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "{}", name),
            Expr::Literal(Value::Str(s)) => write!(f, "'{}'", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Compare { op, left, right } => write!(f, "{} {} {}", left, op.symbol(), right),
            Expr::And(left, right) => write!(f, "({} AND {})", left, right),
            Expr::Or(left, right) => write!(f, "({} OR {})", left, right),
            Expr::In { expr, list } => {
                write!(f, "{} IN (", expr)?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Aggregate { func, args } => {
                write!(f, "{}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::WindowFunction {
                func,
                args,
                partition_by,
                order_by,
            } => {
                write!(f, "{}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ") OVER (PARTITION BY {} ORDER BY {})", partition_by.join(", "), order_by)
            }
            Expr::Macro(name) => write!(f, "${{{}}}", name),
        }
    }
}

// ============================================================================
// Selector
// ============================================================================

/// What a selector is bound to
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorExpr {
    /// A raw column reference passed through unchanged
    Column(String),
    /// A parsed expression
    Expr(Expr),
}

/// An output column bound to a raw reference or a parsed expression
///
/// The `aggregator_output` tag marks outputs produced by aggregation; the
/// plan builder uses it to decide whether a filter term belongs before or
/// after aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    /// Output column name
    pub output: String,

    /// Bound source
    pub expr: SelectorExpr,

    /// Whether this output is produced by an aggregate
    pub aggregator_output: bool,
}

impl Selector {
    /// Selector passing a raw column through under its own name
    pub fn passthrough(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output: name.clone(),
            expr: SelectorExpr::Column(name),
            aggregator_output: false,
        }
    }

    /// Selector binding an output name to an expression
    pub fn expression(output: impl Into<String>, expr: Expr) -> Self {
        let aggregator_output = expr.contains_aggregate();
        Self {
            output: output.into(),
            expr: SelectorExpr::Expr(expr),
            aggregator_output,
        }
    }

    /// The bound expression, viewing raw references as column expressions
    pub fn as_expr(&self) -> Expr {
        match &self.expr {
            SelectorExpr::Column(name) => Expr::Column(name.clone()),
            SelectorExpr::Expr(expr) => expr.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip_shape() {
        let expr = Expr::call(
            "round",
            vec![
                Expr::aggregate(AggregateFunc::Sum, vec![Expr::column("a")])
                    .div(Expr::aggregate(AggregateFunc::Sum, vec![Expr::column("b")])),
                Expr::literal_long(2),
            ],
        );
        assert_eq!(expr.to_string(), "round((sum(a) / sum(b)), 2)");
    }

    #[test]
    fn test_transform_is_bottom_up() {
        // Replace every column reference with a literal; the handler must
        // see rebuilt children when it reaches the parent.
        let expr = Expr::column("a").add(Expr::column("b"));
        let mut order = Vec::new();
        let result = expr
            .transform(&mut |node| {
                order.push(node.to_string());
                Ok(match node {
                    Expr::Column(_) => Expr::literal_long(1),
                    other => other,
                })
            })
            .unwrap();

        assert_eq!(result, Expr::literal_long(1).add(Expr::literal_long(1)));
        assert_eq!(order, vec!["a", "b", "(1 + 1)"]);
    }

    #[test]
    fn test_contains_aggregate() {
        let plain = Expr::column("a").add(Expr::literal_long(1));
        assert!(!plain.contains_aggregate());

        let nested = Expr::call(
            "round",
            vec![Expr::aggregate(AggregateFunc::Sum, vec![Expr::column("a")])],
        );
        assert!(nested.contains_aggregate());
    }

    #[test]
    fn test_split_and_join_conjuncts() {
        let a = Expr::column("x").compare(CmpOp::Gt, Expr::literal_long(1));
        let b = Expr::column("y").compare(CmpOp::Lt, Expr::literal_long(2));
        let c = Expr::column("z").compare(CmpOp::Ne, Expr::literal_long(3));

        let joined = a.clone().and(b.clone()).and(c.clone());
        let terms = joined.split_conjuncts();
        assert_eq!(terms, vec![a, b, c]);

        let rejoined = Expr::join_conjuncts(terms).unwrap();
        assert_eq!(rejoined.split_conjuncts().len(), 3);
    }

    #[test]
    fn test_referenced_columns_dedup() {
        let expr = Expr::column("a")
            .add(Expr::column("b"))
            .mul(Expr::column("a"));
        assert_eq!(expr.referenced_columns(), vec!["a", "b"]);
    }

    #[test]
    fn test_selector_tagging() {
        let agg = Selector::expression(
            "total",
            Expr::aggregate(AggregateFunc::Sum, vec![Expr::column("v")]),
        );
        assert!(agg.aggregator_output);

        let plain = Selector::passthrough("host");
        assert!(!plain.aggregator_output);
    }
}
