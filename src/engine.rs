//! SQL engine seam.
//! The dispatch core never talks to a database driver directly; it resolves a
//! `database_id` to an engine through the registry and hands over one
//! `EngineQuery`. Engines are object-safe so backends can be swapped without
//! touching the dispatch pipeline.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Column name plus the engine-declared type, carried verbatim to the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self { name: name.into(), column_type: column_type.into() }
    }
}

pub type Row = Vec<serde_json::Value>;

/// Raw outcome of one engine call, before any display capping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}

/// How a create-table-as-select should materialize, when requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CtasMethod {
    Table,
    View,
}

impl CtasMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TABLE" => Some(CtasMethod::Table),
            "VIEW" => Some(CtasMethod::View),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CtasDirective {
    pub method: CtasMethod,
    pub tmp_table_name: String,
}

/// One fully prepared engine invocation: rendered SQL plus execution options.
#[derive(Debug, Clone)]
pub struct EngineQuery {
    pub sql: String,
    pub schema: String,
    pub limit: Option<usize>,
    pub cta: Option<CtasDirective>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unsupported statement: {0}")]
    Unsupported(String),
    #[error("engine failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Run one statement to completion. Cancellation is driven by the caller
    /// dropping the returned future.
    async fn run_sql(&self, query: &EngineQuery) -> Result<EngineResult, EngineError>;
}

/// database_id -> engine. Registered once at startup, read per request.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    inner: Arc<parking_lot::RwLock<HashMap<String, Arc<dyn SqlEngine>>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, database_id: impl Into<String>, engine: Arc<dyn SqlEngine>) {
        self.inner.write().insert(database_id.into(), engine);
    }

    pub fn get(&self, database_id: &str) -> Option<Arc<dyn SqlEngine>> {
        self.inner.read().get(database_id).cloned()
    }

    pub fn database_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;

    #[test]
    fn registry_lookup() {
        let reg = EngineRegistry::new();
        assert!(reg.get("demo").is_none());
        reg.register("demo", Arc::new(MemoryEngine::new()));
        assert!(reg.get("demo").is_some());
        assert_eq!(reg.database_ids(), vec!["demo".to_string()]);
    }

    #[test]
    fn ctas_method_parsing() {
        assert_eq!(CtasMethod::parse("table"), Some(CtasMethod::Table));
        assert_eq!(CtasMethod::parse(" VIEW "), Some(CtasMethod::View));
        assert_eq!(CtasMethod::parse("materialized"), None);
    }
}
