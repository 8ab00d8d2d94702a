//! In-process engine over named seeded tables.
//! Backs the bundled demo database and the test suite. Understands just
//! enough SQL for both: literal `SELECT` projections and
//! `SELECT cols FROM table [LIMIT n]`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use crate::engine::{ColumnMeta, EngineError, EngineQuery, EngineResult, Row, SqlEngine};

static SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*select\s+(?P<proj>.+?)(?:\s+from\s+(?P<table>[A-Za-z_][A-Za-z0-9_.]*))?(?:\s+limit\s+(?P<limit>\d+))?\s*;?\s*$",
    )
    .unwrap()
});

#[derive(Debug, Clone)]
struct TableData {
    columns: Vec<ColumnMeta>,
    rows: Vec<Row>,
}

pub struct MemoryEngine {
    tables: parking_lot::RwLock<HashMap<String, TableData>>,
    latency: Option<Duration>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self { tables: parking_lot::RwLock::new(HashMap::new()), latency: None }
    }

    /// Artificial per-call latency, used to exercise the sync timeout path.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_table(self, name: impl Into<String>, columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        self.tables.write().insert(name.into(), TableData { columns, rows });
        self
    }

    fn resolve_table(&self, reference: &str, schema: &str) -> Result<TableData, EngineError> {
        let (prefix, name) = match reference.rsplit_once('.') {
            Some((p, n)) => (Some(p), n),
            None => (None, reference),
        };
        if let Some(p) = prefix {
            if !p.eq_ignore_ascii_case(schema) {
                return Err(EngineError::UnknownTable(reference.to_string()));
            }
        }
        self.tables
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| EngineError::UnknownTable(reference.to_string()))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one literal projection item: integers, floats, quoted strings,
/// booleans and NULL.
fn parse_literal(item: &str) -> Result<(serde_json::Value, &'static str), EngineError> {
    let s = item.trim();
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        return Ok((json!(s[1..s.len() - 1].replace("''", "'")), "text"));
    }
    match s.to_ascii_lowercase().as_str() {
        "true" => return Ok((json!(true), "boolean")),
        "false" => return Ok((json!(false), "boolean")),
        "null" => return Ok((serde_json::Value::Null, "unknown")),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Ok((json!(i), "bigint"));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Ok((json!(f), "double precision"));
    }
    Err(EngineError::Syntax(format!("unsupported expression: {}", s)))
}

fn split_projection(proj: &str) -> Vec<String> {
    proj.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

#[async_trait]
impl SqlEngine for MemoryEngine {
    async fn run_sql(&self, query: &EngineQuery) -> Result<EngineResult, EngineError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if query.cta.is_some() {
            return Err(EngineError::Unsupported("CREATE TABLE AS is not supported by the memory engine".into()));
        }
        let caps = SELECT_RE
            .captures(&query.sql)
            .ok_or_else(|| EngineError::Syntax(format!("cannot parse statement: {}", query.sql.trim())))?;
        let proj = caps.name("proj").map(|m| m.as_str()).unwrap_or("*");
        let sql_limit = caps.name("limit").and_then(|m| m.as_str().parse::<usize>().ok());
        let effective_limit = match (sql_limit, query.limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match caps.name("table") {
            Some(table_ref) => {
                let table = self.resolve_table(table_ref.as_str(), &query.schema)?;
                let (columns, indices): (Vec<ColumnMeta>, Vec<usize>) = if proj.trim() == "*" {
                    (table.columns.clone(), (0..table.columns.len()).collect())
                } else {
                    let mut cols = Vec::new();
                    let mut idx = Vec::new();
                    for name in split_projection(proj) {
                        let pos = table
                            .columns
                            .iter()
                            .position(|c| c.name.eq_ignore_ascii_case(&name))
                            .ok_or_else(|| EngineError::Syntax(format!("unknown column: {}", name)))?;
                        cols.push(table.columns[pos].clone());
                        idx.push(pos);
                    }
                    (cols, idx)
                };
                let take = effective_limit.unwrap_or(table.rows.len());
                let rows = table
                    .rows
                    .iter()
                    .take(take)
                    .map(|r| indices.iter().map(|&i| r.get(i).cloned().unwrap_or(serde_json::Value::Null)).collect())
                    .collect();
                Ok(EngineResult { columns, rows })
            }
            None => {
                // Literal projection, e.g. SELECT 1.
                let mut columns = Vec::new();
                let mut row = Vec::new();
                for item in split_projection(proj) {
                    let (value, ty) = parse_literal(&item)?;
                    columns.push(ColumnMeta::new("?column?", ty));
                    row.push(value);
                }
                if columns.is_empty() {
                    return Err(EngineError::Syntax("empty projection".into()));
                }
                Ok(EngineResult { columns, rows: vec![row] })
            }
        }
    }
}

/// Engine whose every call fails; mirrors the failing client used to test
/// error propagation without a real backend.
pub struct FailingEngine {
    message: String,
}

impl FailingEngine {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[async_trait]
impl SqlEngine for FailingEngine {
    async fn run_sql(&self, _query: &EngineQuery) -> Result<EngineResult, EngineError> {
        Err(EngineError::Backend(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_engine() -> MemoryEngine {
        MemoryEngine::new().with_table(
            "events",
            vec![ColumnMeta::new("id", "bigint"), ColumnMeta::new("label", "text")],
            vec![
                vec![json!(1), json!("alpha")],
                vec![json!(2), json!("beta")],
                vec![json!(3), json!("gamma")],
            ],
        )
    }

    fn q(sql: &str, limit: Option<usize>) -> EngineQuery {
        EngineQuery { sql: sql.to_string(), schema: "public".to_string(), limit, cta: None }
    }

    #[tokio::test]
    async fn select_literal() {
        let res = demo_engine().run_sql(&q("SELECT 1", None)).await.unwrap();
        assert_eq!(res.columns.len(), 1);
        assert_eq!(res.columns[0].column_type, "bigint");
        assert_eq!(res.rows, vec![vec![json!(1)]]);
    }

    #[tokio::test]
    async fn select_star_with_limit() {
        let res = demo_engine().run_sql(&q("SELECT * FROM events LIMIT 2", None)).await.unwrap();
        assert_eq!(res.rows.len(), 2);
        assert_eq!(res.columns.len(), 2);
    }

    #[tokio::test]
    async fn caller_limit_caps_sql_limit() {
        let res = demo_engine().run_sql(&q("SELECT * FROM events LIMIT 3", Some(1))).await.unwrap();
        assert_eq!(res.rows.len(), 1);
    }

    #[tokio::test]
    async fn projection_and_schema_qualified_table() {
        let res = demo_engine().run_sql(&q("SELECT label FROM public.events", None)).await.unwrap();
        assert_eq!(res.columns[0].name, "label");
        assert_eq!(res.rows[0], vec![json!("alpha")]);
    }

    #[tokio::test]
    async fn unknown_table_and_wrong_schema() {
        let err = demo_engine().run_sql(&q("SELECT * FROM missing", None)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTable(_)));
        let err = demo_engine().run_sql(&q("SELECT * FROM other.events", None)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTable(_)));
    }

    #[tokio::test]
    async fn cta_is_rejected() {
        let mut query = q("SELECT * FROM events", None);
        query.cta = Some(crate::engine::CtasDirective {
            method: crate::engine::CtasMethod::Table,
            tmp_table_name: "tmp_x".into(),
        });
        let err = demo_engine().run_sql(&query).await.unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));
    }

    #[tokio::test]
    async fn non_select_is_syntax_error() {
        let err = demo_engine().run_sql(&q("DROP TABLE events", None)).await.unwrap_err();
        assert!(matches!(err, EngineError::Syntax(_)));
    }
}
