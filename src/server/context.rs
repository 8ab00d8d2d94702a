//! Execution context: the immutable request envelope.
//! Built once per submission from the POST body, validated up front, then
//! owned by the dispatch command for the lifetime of the request.

use serde::Deserialize;
use serde_json::Value;

use crate::engine::{CtasDirective, CtasMethod};
use crate::error::{AppError, AppResult};
use crate::storage::opaque_key;

/// Wire shape of `POST /execute/`. Field casing follows the existing client
/// contract: `runAsync`, `queryLimit` and `templateParams` are camel-cased,
/// everything else is snake_case.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutePayload {
    pub sql: String,
    pub database_id: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default, rename = "runAsync")]
    pub run_async: bool,
    #[serde(default, rename = "queryLimit")]
    pub query_limit: Option<usize>,
    #[serde(default = "default_true")]
    pub expand_data: bool,
    #[serde(default)]
    pub select_as_cta: bool,
    #[serde(default)]
    pub ctas_method: Option<String>,
    #[serde(default)]
    pub tmp_table_name: Option<String>,
    #[serde(default, rename = "templateParams")]
    pub template_params: Option<serde_json::Map<String, Value>>,
    /// Editor metadata, accepted and carried but not interpreted here.
    #[serde(default)]
    pub sql_editor_id: Option<String>,
    #[serde(default)]
    pub tab: Option<String>,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Synchronous,
    Asynchronous,
}

/// Validated, immutable envelope for one execution request.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub sql_text: String,
    pub database_id: String,
    pub schema_name: String,
    pub client_id: String,
    pub run_asynchronous: bool,
    pub expand_data: bool,
    pub select_as_cta: bool,
    pub ctas_method: Option<CtasMethod>,
    pub tmp_table_name: Option<String>,
    pub query_limit: Option<usize>,
    pub template_params: serde_json::Map<String, Value>,
    pub sql_editor_id: Option<String>,
    pub tab: Option<String>,
}

impl ExecutionContext {
    pub fn from_payload(payload: ExecutePayload) -> AppResult<Self> {
        if payload.sql.trim().is_empty() {
            return Err(AppError::validation("invalid_payload", "sql must not be empty"));
        }
        if payload.database_id.trim().is_empty() {
            return Err(AppError::validation("invalid_payload", "database_id must not be empty"));
        }
        let ctas_method = match (payload.select_as_cta, payload.ctas_method.as_deref()) {
            (false, _) => None,
            (true, None) => Some(CtasMethod::Table),
            (true, Some(raw)) => Some(CtasMethod::parse(raw).ok_or_else(|| {
                AppError::validation(
                    "invalid_payload".to_string(),
                    format!("ctas_method must be TABLE or VIEW, got '{}'", raw),
                )
            })?),
        };
        if payload.select_as_cta && payload.tmp_table_name.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(AppError::validation(
                "invalid_payload",
                "select_as_cta requires tmp_table_name",
            ));
        }
        let client_id = match payload.client_id {
            Some(id) if !id.trim().is_empty() => id,
            // Clients usually mint their own short id; fall back to a fresh one.
            _ => opaque_key()[..10].to_string(),
        };
        Ok(Self {
            sql_text: payload.sql,
            database_id: payload.database_id,
            schema_name: payload.schema,
            client_id,
            run_asynchronous: payload.run_async,
            expand_data: payload.expand_data,
            select_as_cta: payload.select_as_cta,
            ctas_method,
            tmp_table_name: payload.tmp_table_name,
            query_limit: payload.query_limit,
            template_params: payload.template_params.unwrap_or_default(),
            sql_editor_id: payload.sql_editor_id,
            tab: payload.tab,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        if self.run_asynchronous {
            ExecutionMode::Asynchronous
        } else {
            ExecutionMode::Synchronous
        }
    }

    /// CTA directive for the engine call, when requested.
    pub fn cta(&self) -> Option<CtasDirective> {
        match (self.select_as_cta, self.ctas_method, self.tmp_table_name.as_ref()) {
            (true, Some(method), Some(name)) => {
                Some(CtasDirective { method, tmp_table_name: name.clone() })
            }
            _ => None,
        }
    }
}
