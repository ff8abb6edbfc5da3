//! Composite metric expression evaluation
//!
//! A metric *expression* — arithmetic over one or more named metric
//! queries — compiles into a tree of leaf query nodes and binary-operator
//! nodes. Evaluation is asynchronous: a binary node fans out to both
//! children concurrently and combines once both complete. Each leaf
//! memoizes its result in a once-initialized async cell, so a leaf
//! referenced twice in the same tree issues exactly one underlying call.
//!
//! Whether a node is scalar is decided statically at compile time; the
//! combination rules (scalar broadcast, vector hash join) live in
//! [`combine`]. A failed leaf fails the whole evaluation; in-flight
//! siblings are not cancelled, their results are simply discarded.
//!
//! Trees are single-cycle: build a fresh tree per evaluation cycle rather
//! than re-arming an old one.

pub mod combine;
pub mod condition;

pub use condition::Condition;

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore};

use crate::config::EvaluatorConfig;
use crate::error::{Error, Result};
use crate::expr::BinaryOp;
use crate::source::{EvalResult, MetricSource, SourceRequest};

// ============================================================================
// Node tree
// ============================================================================

/// One node of a compiled composite expression
pub enum EvalNode {
    /// A constant; always scalar
    Literal(f64),

    /// A leaf metric query with its memoized result
    Query(QueryNode),

    /// Arithmetic over two child nodes
    Binary {
        /// The operator
        op: BinaryOp,
        /// Left operand
        left: Arc<EvalNode>,
        /// Right operand
        right: Arc<EvalNode>,
    },
}

impl EvalNode {
    /// Whether this node produces a scalar result
    ///
    /// Statically determined from the tree shape and the leaf requests; no
    /// data access happens here.
    pub fn is_scalar(&self) -> bool {
        match self {
            EvalNode::Literal(_) => true,
            EvalNode::Query(node) => node.scalar,
            EvalNode::Binary { left, right, .. } => left.is_scalar() && right.is_scalar(),
        }
    }

    /// Evaluate the subtree rooted at this node
    ///
    /// Results are shared; evaluating the same node again returns the
    /// memoized value without re-querying.
    pub fn evaluate(&self) -> BoxFuture<'_, Result<Arc<EvalResult>>> {
        Box::pin(async move {
            match self {
                EvalNode::Literal(value) => Ok(Arc::new(EvalResult::scalar(*value))),
                EvalNode::Query(node) => node.fetch().await,
                EvalNode::Binary { op, left, right } => {
                    // Fan out to both children; join waits for both, so a
                    // failing sibling never cancels the other.
                    let (left_result, right_result) =
                        tokio::join!(left.evaluate(), right.evaluate());
                    let left_result = left_result?;
                    let right_result = right_result?;
                    combine::combine(
                        *op,
                        &left_result,
                        left.is_scalar(),
                        &right_result,
                        right.is_scalar(),
                    )
                    .map(Arc::new)
                }
            }
        })
    }
}

/// A leaf query node owning its memo cell
pub struct QueryNode {
    request: SourceRequest,
    source: Arc<dyn MetricSource>,
    limiter: Arc<Semaphore>,
    cell: OnceCell<Arc<EvalResult>>,
    scalar: bool,
}

impl QueryNode {
    /// The request this leaf executes
    pub fn request(&self) -> &SourceRequest {
        &self.request
    }

    async fn fetch(&self) -> Result<Arc<EvalResult>> {
        self.cell
            .get_or_try_init(|| async {
                let _permit = self
                    .limiter
                    .acquire()
                    .await
                    .map_err(|_| Error::source("evaluator shut down"))?;
                tracing::debug!(source = %self.request.source, "executing leaf metric query");
                self.source.execute(&self.request).await.map(Arc::new)
            })
            .await
            .map(Arc::clone)
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Compiles and evaluates composite metric expressions against a source
pub struct CompositeEvaluator {
    source: Arc<dyn MetricSource>,
    limiter: Arc<Semaphore>,
    config: EvaluatorConfig,
}

impl CompositeEvaluator {
    /// Create an evaluator over a metric source
    pub fn new(source: Arc<dyn MetricSource>, config: EvaluatorConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            source,
            limiter,
            config,
        }
    }

    /// A constant leaf
    pub fn literal(&self, value: f64) -> Arc<EvalNode> {
        Arc::new(EvalNode::Literal(value))
    }

    /// A metric query leaf
    ///
    /// The node owns its memo cell; share the returned `Arc` to reference
    /// the same underlying query from several places in a tree.
    pub fn query(&self, request: SourceRequest) -> Arc<EvalNode> {
        let scalar = request.is_scalar();
        Arc::new(EvalNode::Query(QueryNode {
            request,
            source: Arc::clone(&self.source),
            limiter: Arc::clone(&self.limiter),
            cell: OnceCell::new(),
            scalar,
        }))
    }

    /// A binary operator node over two children
    pub fn binary(&self, op: BinaryOp, left: Arc<EvalNode>, right: Arc<EvalNode>) -> Arc<EvalNode> {
        Arc::new(EvalNode::Binary { op, left, right })
    }

    /// Relative change against the same query some time ago:
    /// `(current - base) / base` with `base = query(offset)`
    ///
    /// The base leaf is shared by the subtraction and the division, so it
    /// executes once.
    pub fn relative_change(&self, request: SourceRequest, offset_ms: i64) -> Arc<EvalNode> {
        let base = self.query(request.clone().with_offset_ms(offset_ms));
        let current = self.query(request);
        let delta = self.binary(BinaryOp::Sub, current, Arc::clone(&base));
        self.binary(BinaryOp::Div, delta, base)
    }

    /// Evaluate a compiled tree, enforcing the configured depth guard
    pub async fn evaluate(&self, node: &Arc<EvalNode>) -> Result<Arc<EvalResult>> {
        let depth = tree_depth(node);
        if depth > self.config.max_depth {
            return Err(Error::Configuration(format!(
                "expression tree depth {} exceeds the maximum of {}",
                depth, self.config.max_depth
            )));
        }
        node.evaluate().await
    }
}

fn tree_depth(node: &Arc<EvalNode>) -> usize {
    match node.as_ref() {
        EvalNode::Literal(_) | EvalNode::Query(_) => 1,
        EvalNode::Binary { left, right, .. } => 1 + tree_depth(left).max(tree_depth(right)),
    }
}

// ============================================================================
// Tests
// ============================================================================
