//! Schema metadata collaborator
//!
//! Resolves column identifiers to their declared type and, for stored
//! expression columns, the expression body to inline. Consulted read-only
//! during rewriting and pre-filter qualification; the actual metadata
//! store lives outside this crate.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::expr::Expr;
use crate::types::DataType;

/// Resolved metadata for one column
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    /// Column name
    pub name: String,

    /// Declared data type
    pub data_type: DataType,

    /// For stored-expression columns, the body to substitute inline
    pub expression: Option<Expr>,
}

impl ColumnMeta {
    /// Plain stored column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            expression: None,
        }
    }

    /// Mark this column as a stored expression with the given body
    pub fn with_expression(mut self, body: Expr) -> Self {
        self.expression = Some(body);
        self
    }
}

/// Read-only resolution of identifiers against the raw schema
pub trait SchemaProvider: Send + Sync {
    /// Resolve an identifier; `None` when it names nothing in the raw
    /// schema (it may still be a computed output alias)
    fn resolve(&self, ident: &str) -> Option<ColumnMeta>;
}

/// In-memory schema provider
///
/// The production metadata store is a collaborator outside this crate;
/// this implementation backs tests and embedded use.
#[derive(Debug, Default)]
pub struct MemorySchemaProvider {
    columns: RwLock<HashMap<String, ColumnMeta>>,
}

impl MemorySchemaProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or replace a column
    pub fn define(&self, meta: ColumnMeta) {
        self.columns.write().insert(meta.name.clone(), meta);
    }

    /// Define several plain columns at once
    pub fn define_all(&self, columns: &[(&str, DataType)]) {
        let mut guard = self.columns.write();
        for (name, data_type) in columns {
            guard.insert((*name).to_string(), ColumnMeta::new(*name, *data_type));
        }
    }
}

impl SchemaProvider for MemorySchemaProvider {
    fn resolve(&self, ident: &str) -> Option<ColumnMeta> {
        self.columns.read().get(ident).cloned()
    }
}

// ============================================================================
// Tests
// ============================================================================
