//! Error types for the query engine
//!
//! Compile-time errors (`InvalidExpression`, `UnsupportedOperation`,
//! `Configuration`) surface synchronously from the rewriter and the plan
//! builder. Runtime failures from the metric source propagate through the
//! asynchronous result channel of the failing evaluator node and abort the
//! whole composite evaluation.

use thiserror::Error;

/// Main error type for planning and evaluation
#[derive(Error, Debug)]
pub enum Error {
    /// An expression that can never compile: nested aggregates, unresolved
    /// identifiers, unsupported data types reaching a comparator, empty
    /// IN-lists. Never retried.
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// A programming or configuration error: an unknown arithmetic or
    /// aggregate operator reaching evaluation. Fails fast.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A referenced column is absent from a table
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// The metric source failed while executing a leaf query
    #[error("Data source error: {0}")]
    Source(String, #[source] Option<Box<dyn std::error::Error + Send + Sync>>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an invalid-expression error
    pub fn invalid_expression(message: impl Into<String>) -> Self {
        Error::InvalidExpression(message.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedOperation(message.into())
    }

    /// Create a data-source error without an underlying cause
    pub fn source(message: impl Into<String>) -> Self {
        Error::Source(message.into(), None)
    }

    /// Create a data-source error wrapping an underlying cause
    pub fn source_with(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Source(message.into(), Some(Box::new(cause)))
    }

    /// Whether this error originates at compile time (never retried)
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            Error::InvalidExpression(_) | Error::UnsupportedOperation(_) | Error::Configuration(_)
        )
    }
}

/// Result type alias for query operations
pub type Result<T> = std::result::Result<T, Error>;
