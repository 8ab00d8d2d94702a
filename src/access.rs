//! Access policy for query execution.
//! Capability checks run before any SQL is rendered, persisted or executed:
//! a denied caller leaves no trace. Grants are looked up hierarchically,
//! schema grant first, then database-wide, then global, with an admin
//! short-circuit on top. Individually restricted datasets need their own
//! grant even when the scope check passes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::server::context::ExecutionContext;

/// On-disk policy shape (`SQLDOCK_POLICY_FILE`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySpec {
    /// When true, every caller passes the scope check; dataset restrictions
    /// still apply.
    #[serde(default)]
    pub default_allow: bool,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub grants: Vec<GrantSpec>,
    #[serde(default)]
    pub restricted_datasets: Vec<DatasetSpec>,
    #[serde(default)]
    pub dataset_grants: Vec<DatasetGrantSpec>,
}

/// One scope grant. `schema: None` grants the whole database;
/// `database: None` grants everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSpec {
    pub client: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub database: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetGrantSpec {
    pub client: String,
    pub database: String,
    pub table: String,
}

static TABLE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_.]*)").unwrap());

/// Table names referenced by a statement, lowercased and stripped of any
/// schema qualification. Best-effort lexical scan, not a SQL parse.
fn referenced_tables(sql: &str) -> Vec<String> {
    TABLE_REF_RE
        .captures_iter(sql)
        .map(|c| {
            let raw = c[1].to_ascii_lowercase();
            raw.rsplit_once('.').map(|(_, t)| t.to_string()).unwrap_or(raw)
        })
        .collect()
}

pub struct AccessPolicy {
    default_allow: bool,
    admins: HashSet<String>,
    /// client -> (database or None for global, schema or None for db-wide)
    grants: HashMap<String, Vec<(Option<String>, Option<String>)>>,
    /// database -> tables needing an explicit dataset grant
    restricted: HashMap<String, HashSet<String>>,
    /// (client, database) -> granted tables
    dataset_grants: HashMap<(String, String), HashSet<String>>,
}

impl AccessPolicy {
    /// Every caller passes the scope check; no datasets are restricted.
    pub fn permit_all() -> Self {
        Self::from_spec(PolicySpec { default_allow: true, ..PolicySpec::default() })
    }

    pub fn from_spec(spec: PolicySpec) -> Self {
        let mut grants: HashMap<String, Vec<(Option<String>, Option<String>)>> = HashMap::new();
        for g in spec.grants {
            grants.entry(g.client).or_default().push((g.database, g.schema));
        }
        let mut restricted: HashMap<String, HashSet<String>> = HashMap::new();
        for d in spec.restricted_datasets {
            restricted.entry(d.database).or_default().insert(d.table.to_ascii_lowercase());
        }
        let mut dataset_grants: HashMap<(String, String), HashSet<String>> = HashMap::new();
        for g in spec.dataset_grants {
            dataset_grants
                .entry((g.client, g.database))
                .or_default()
                .insert(g.table.to_ascii_lowercase());
        }
        Self {
            default_allow: spec.default_allow,
            admins: spec.admins.into_iter().collect(),
            grants,
            restricted,
            dataset_grants,
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let spec: PolicySpec = serde_json::from_slice(&bytes)?;
        Ok(Self::from_spec(spec))
    }

    fn scope_allowed(&self, client: &str, database: &str, schema: &str) -> bool {
        if self.default_allow {
            return true;
        }
        let Some(scopes) = self.grants.get(client) else { return false };
        // Most specific first: schema grant, database grant, global grant.
        scopes.iter().any(|(db, sc)| match (db.as_deref(), sc.as_deref()) {
            (Some(d), Some(s)) => d == database && s == schema,
            (Some(d), None) => d == database,
            (None, _) => true,
        })
    }

    /// Gate one execution request. Must be called before rendering or any
    /// side effect.
    pub fn validate(&self, ctx: &ExecutionContext) -> AppResult<()> {
        if self.admins.contains(&ctx.client_id) {
            return Ok(());
        }
        if !self.scope_allowed(&ctx.client_id, &ctx.database_id, &ctx.schema_name) {
            return Err(AppError::forbidden(
                "query_access_forbidden".to_string(),
                format!(
                    "client '{}' may not run queries against {}/{}",
                    ctx.client_id, ctx.database_id, ctx.schema_name
                ),
            ));
        }
        if let Some(restricted) = self.restricted.get(&ctx.database_id) {
            let granted = self.dataset_grants.get(&(ctx.client_id.clone(), ctx.database_id.clone()));
            for table in referenced_tables(&ctx.sql_text) {
                if restricted.contains(&table) && !granted.map(|g| g.contains(&table)).unwrap_or(false) {
                    return Err(AppError::forbidden(
                        "dataset_access_denied".to_string(),
                        format!("client '{}' may not access dataset '{}'", ctx.client_id, table),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::context::{ExecutePayload, ExecutionContext};
    use serde_json::json;

    fn ctx(client: &str, db: &str, schema: &str, sql: &str) -> ExecutionContext {
        let p: ExecutePayload = serde_json::from_value(json!({
            "sql": sql, "database_id": db, "schema": schema, "client_id": client,
        }))
        .unwrap();
        ExecutionContext::from_payload(p).unwrap()
    }

    #[test]
    fn permit_all_lets_everything_through() {
        let policy = AccessPolicy::permit_all();
        assert!(policy.validate(&ctx("anyone", "demo", "public", "SELECT 1")).is_ok());
    }

    #[test]
    fn default_deny_without_grant() {
        let policy = AccessPolicy::from_spec(PolicySpec::default());
        let err = policy.validate(&ctx("c1", "demo", "public", "SELECT 1")).unwrap_err();
        assert_eq!(err.code_str(), "query_access_forbidden");
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn hierarchical_grant_lookup() {
        let policy = AccessPolicy::from_spec(PolicySpec {
            grants: vec![
                GrantSpec { client: "schema_user".into(), database: Some("demo".into()), schema: Some("public".into()) },
                GrantSpec { client: "db_user".into(), database: Some("demo".into()), schema: None },
                GrantSpec { client: "global_user".into(), database: None, schema: None },
            ],
            ..PolicySpec::default()
        });
        assert!(policy.validate(&ctx("schema_user", "demo", "public", "SELECT 1")).is_ok());
        assert!(policy.validate(&ctx("schema_user", "demo", "private", "SELECT 1")).is_err());
        assert!(policy.validate(&ctx("db_user", "demo", "private", "SELECT 1")).is_ok());
        assert!(policy.validate(&ctx("db_user", "other", "public", "SELECT 1")).is_err());
        assert!(policy.validate(&ctx("global_user", "other", "public", "SELECT 1")).is_ok());
    }

    #[test]
    fn admin_short_circuit() {
        let policy = AccessPolicy::from_spec(PolicySpec {
            admins: vec!["root".into()],
            restricted_datasets: vec![DatasetSpec { database: "demo".into(), table: "salaries".into() }],
            ..PolicySpec::default()
        });
        assert!(policy.validate(&ctx("root", "demo", "public", "SELECT * FROM salaries")).is_ok());
    }

    #[test]
    fn restricted_dataset_needs_its_own_grant() {
        let policy = AccessPolicy::from_spec(PolicySpec {
            default_allow: true,
            restricted_datasets: vec![DatasetSpec { database: "demo".into(), table: "salaries".into() }],
            dataset_grants: vec![DatasetGrantSpec {
                client: "hr".into(),
                database: "demo".into(),
                table: "salaries".into(),
            }],
            ..PolicySpec::default()
        });
        let err = policy
            .validate(&ctx("intern", "demo", "public", "SELECT * FROM public.Salaries LIMIT 5"))
            .unwrap_err();
        assert_eq!(err.code_str(), "dataset_access_denied");
        assert!(policy.validate(&ctx("hr", "demo", "public", "SELECT * FROM salaries")).is_ok());
        // Unrestricted tables in the same database stay open.
        assert!(policy.validate(&ctx("intern", "demo", "public", "SELECT * FROM events")).is_ok());
    }

    #[test]
    fn join_references_are_scanned() {
        let policy = AccessPolicy::from_spec(PolicySpec {
            default_allow: true,
            restricted_datasets: vec![DatasetSpec { database: "demo".into(), table: "salaries".into() }],
            ..PolicySpec::default()
        });
        let sql = "SELECT e.id FROM events e JOIN salaries s LIMIT 1";
        assert!(policy.validate(&ctx("intern", "demo", "public", sql)).is_err());
    }

    #[test]
    fn policy_file_roundtrip() {
        let spec = PolicySpec {
            default_allow: false,
            admins: vec!["root".into()],
            grants: vec![GrantSpec { client: "c1".into(), database: Some("demo".into()), schema: None }],
            ..PolicySpec::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, serde_json::to_vec(&spec).unwrap()).unwrap();
        let policy = AccessPolicy::load(&path).unwrap();
        assert!(policy.validate(&ctx("c1", "demo", "public", "SELECT 1")).is_ok());
        assert!(policy.validate(&ctx("c2", "demo", "public", "SELECT 1")).is_err());
    }
}
