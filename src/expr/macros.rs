//! Macro expressions
//!
//! A macro is a named placeholder expanded to a concrete sub-expression
//! before aggregator extraction. Expansion happens first because a macro
//! body may itself contain function calls that the extraction pass must
//! see (an "interval seconds" macro expanding to a literal, an
//! "instance count" macro expanding to a distinct count, and so on).

use parking_lot::RwLock;
use std::collections::HashMap;

use super::Expr;
use crate::error::{Error, Result};

/// Registry of named macro expansions
///
/// Shared read-mostly state: registrations happen at configuration time,
/// lookups on every rewrite.
#[derive(Debug, Default)]
pub struct MacroRegistry {
    inner: RwLock<HashMap<String, Expr>>,
}

impl MacroRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a macro body
    pub fn register(&self, name: impl Into<String>, body: Expr) {
        self.inner.write().insert(name.into(), body);
    }

    /// Look up a macro body
    pub fn lookup(&self, name: &str) -> Option<Expr> {
        self.inner.read().get(name).cloned()
    }

    /// Expand every macro reference in an expression
    ///
    /// Bodies are substituted verbatim; a body may not itself reference
    /// another macro (one level of expansion, matching how registrations
    /// are produced). An unknown macro name is an unresolved identifier.
    pub fn expand(&self, expr: Expr) -> Result<Expr> {
        expr.transform(&mut |node| match node {
            Expr::Macro(name) => self
                .lookup(&name)
                .ok_or_else(|| Error::invalid_expression(format!("unresolved macro '{}'", name))),
            other => Ok(other),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::AggregateFunc;

    #[test]
    fn test_expand_replaces_macro() {
        let registry = MacroRegistry::new();
        registry.register("interval_seconds", Expr::literal_long(60));

        let expr = Expr::column("total").div(Expr::Macro("interval_seconds".to_string()));
        let expanded = registry.expand(expr).unwrap();
        assert_eq!(expanded, Expr::column("total").div(Expr::literal_long(60)));
    }

    #[test]
    fn test_expansion_may_introduce_aggregates() {
        // The expanded body must be visible to aggregator extraction,
        // which is why expansion runs first.
        let registry = MacroRegistry::new();
        registry.register(
            "instance_count",
            Expr::aggregate(AggregateFunc::CountDistinct, vec![Expr::column("instance")]),
        );

        let expr = Expr::column("total").div(Expr::Macro("instance_count".to_string()));
        let expanded = registry.expand(expr).unwrap();
        assert!(expanded.contains_aggregate());
    }

    #[test]
    fn test_unknown_macro_is_invalid_expression() {
        let registry = MacroRegistry::new();
        let err = registry.expand(Expr::Macro("nope".to_string())).unwrap_err();
        assert!(matches!(err, Error::InvalidExpression(_)));
    }
}
