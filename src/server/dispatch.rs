//! Execution dispatch command.
//! The single integration point for one submission: validate access, render
//! the SQL, persist the query record, invoke the chosen executor variant and
//! normalize whatever came back. Aborts before the record exists on
//! validation, render and forbidden failures; never retries on its own.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::AccessPolicy;
use crate::engine::{EngineQuery, EngineRegistry};
use crate::error::{AppError, AppResult};
use crate::render::render;
use crate::server::context::{ExecutionContext, ExecutionMode};
use crate::server::executor::{ExecutionOutcome, ExecutionRequest, SqlExecutor};
use crate::server::normalize::normalize;
use crate::storage::{opaque_key, QueryRecord, QueryStatus, QueryStore, ResultsBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    QueryIsRunning,
    Failed,
}

/// Final outcome of one dispatch, ready for the wire.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub payload: serde_json::Value,
}

impl CommandResult {
    /// Completed requests answer 200 even when the query itself failed; the
    /// failure detail rides in the payload. In-flight hand-offs answer 202.
    pub fn http_status(&self) -> u16 {
        match self.status {
            CommandStatus::Success | CommandStatus::Failed => 200,
            CommandStatus::QueryIsRunning => 202,
        }
    }
}

pub struct ExecuteSqlCommand {
    ctx: ExecutionContext,
    executor: SqlExecutor,
    queries: QueryStore,
    results: ResultsBackend,
    engines: EngineRegistry,
    policy: Arc<AccessPolicy>,
    max_display_rows: usize,
}

impl ExecuteSqlCommand {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: ExecutionContext,
        executor: SqlExecutor,
        queries: QueryStore,
        results: ResultsBackend,
        engines: EngineRegistry,
        policy: Arc<AccessPolicy>,
        max_display_rows: usize,
    ) -> Self {
        Self { ctx, executor, queries, results, engines, policy, max_display_rows }
    }

    pub async fn run(self) -> AppResult<CommandResult> {
        // Validating: access first, then collaborator checks. Nothing below
        // this block has happened yet for a rejected request.
        self.policy.validate(&self.ctx)?;
        let engine = self.engines.get(&self.ctx.database_id).ok_or_else(|| {
            AppError::validation(
                "unknown_database".to_string(),
                format!("no database registered under id '{}'", self.ctx.database_id),
            )
        })?;
        if self.ctx.mode() == ExecutionMode::Asynchronous && !self.results.is_enabled() {
            return Err(AppError::validation(
                "invalid_payload",
                "asynchronous execution requires the results backend",
            ));
        }

        // Rendering: all-or-nothing macro expansion.
        let rendered = render(&self.ctx.sql_text, &self.ctx.template_params)?;

        // Persisting: exactly one record per dispatched request.
        let record = QueryRecord {
            id: Uuid::new_v4(),
            client_id: self.ctx.client_id.clone(),
            sql_text: rendered.clone(),
            database_id: self.ctx.database_id.clone(),
            schema_name: self.ctx.schema_name.clone(),
            status: QueryStatus::Pending,
            submitted_by: self.ctx.client_id.clone(),
            results_key: opaque_key(),
            started_at: Utc::now(),
            ended_at: None,
            row_count: None,
            error_message: None,
        };
        self.queries.insert(record.clone())?;

        // Executing: exactly one executor invocation.
        let request = ExecutionRequest {
            query_id: record.id,
            results_key: record.results_key.clone(),
            engine,
            query: EngineQuery {
                sql: rendered,
                schema: self.ctx.schema_name.clone(),
                limit: self.ctx.query_limit,
                cta: self.ctx.cta(),
            },
        };
        let outcome = self.executor.execute(request, &self.queries, &self.results).await?;

        // Normalizing: one response contract whatever happened.
        let final_record = self.queries.get(record.id).unwrap_or(record);
        Ok(match outcome {
            ExecutionOutcome::Completed { raw } => {
                let result_set = normalize(&raw, self.max_display_rows, final_record.id);
                CommandResult {
                    status: CommandStatus::Success,
                    payload: json!({
                        "status": "success",
                        "query": final_record,
                        "result": result_set.to_payload(self.ctx.expand_data),
                    }),
                }
            }
            ExecutionOutcome::Running { results_key } => CommandResult {
                status: CommandStatus::QueryIsRunning,
                payload: json!({
                    "status": "running",
                    "results_key": results_key,
                    "query": final_record,
                }),
            },
            ExecutionOutcome::Failed { error } => CommandResult {
                status: CommandStatus::Failed,
                payload: json!({
                    "status": "failed",
                    "errors": [error.detail()],
                    "query": final_record,
                }),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::PolicySpec;
    use crate::engine::memory::MemoryEngine;
    use crate::engine::ColumnMeta;
    use crate::server::context::ExecutePayload;
    use crate::server::executor::{spawn_workers, AsynchronousExecutor, SynchronousExecutor};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Env {
        queries: QueryStore,
        results: ResultsBackend,
        engines: EngineRegistry,
        policy: Arc<AccessPolicy>,
        queue: mpsc::Sender<crate::server::executor::QueryTask>,
    }

    fn env() -> Env {
        let queries = QueryStore::new();
        let results = ResultsBackend::new(None);
        let engines = EngineRegistry::new();
        engines.register(
            "demo",
            Arc::new(MemoryEngine::new().with_table(
                "events",
                vec![ColumnMeta::new("id", "bigint")],
                (0..20).map(|i| vec![json!(i)]).collect(),
            )),
        );
        let (tx, rx) = mpsc::channel(16);
        spawn_workers(1, rx, queries.clone(), results.clone());
        Env { queries, results, engines, policy: Arc::new(AccessPolicy::permit_all()), queue: tx }
    }

    fn ctx(body: serde_json::Value) -> ExecutionContext {
        let p: ExecutePayload = serde_json::from_value(body).unwrap();
        ExecutionContext::from_payload(p).unwrap()
    }

    fn command(env: &Env, ctx: ExecutionContext, max_rows: usize) -> ExecuteSqlCommand {
        let executor = match ctx.mode() {
            ExecutionMode::Synchronous => SqlExecutor::Synchronous(SynchronousExecutor {
                timeout: Duration::from_secs(5),
                persist_results: true,
            }),
            ExecutionMode::Asynchronous => {
                SqlExecutor::Asynchronous(AsynchronousExecutor { queue: env.queue.clone() })
            }
        };
        ExecuteSqlCommand::new(
            ctx,
            executor,
            env.queries.clone(),
            env.results.clone(),
            env.engines.clone(),
            Arc::clone(&env.policy),
            max_rows,
        )
    }

    #[tokio::test]
    async fn sync_select_one() {
        let env = env();
        let c = ctx(json!({ "sql": "SELECT 1", "database_id": "demo" }));
        let res = command(&env, c, 100).run().await.unwrap();
        assert_eq!(res.status, CommandStatus::Success);
        assert_eq!(res.http_status(), 200);
        assert_eq!(res.payload["result"]["rows"], json!([[1]]));
        assert_eq!(res.payload["result"]["row_count_total"], json!(1));
        assert_eq!(res.payload["result"]["is_limited"], json!(false));
        assert_eq!(env.queries.count(), 1);
    }

    #[tokio::test]
    async fn sync_applies_display_cap() {
        let env = env();
        let c = ctx(json!({ "sql": "SELECT * FROM events", "database_id": "demo" }));
        let res = command(&env, c, 5).run().await.unwrap();
        assert_eq!(res.payload["result"]["row_count_displayed"], json!(5));
        assert_eq!(res.payload["result"]["row_count_total"], json!(20));
        assert_eq!(res.payload["result"]["is_limited"], json!(true));
    }

    #[tokio::test]
    async fn async_answers_with_receipt() {
        let env = env();
        let c = ctx(json!({ "sql": "SELECT * FROM events", "database_id": "demo", "runAsync": true }));
        let res = command(&env, c, 100).run().await.unwrap();
        assert_eq!(res.status, CommandStatus::QueryIsRunning);
        assert_eq!(res.http_status(), 202);
        let key = res.payload["results_key"].as_str().unwrap().to_string();
        assert!(!key.is_empty());
        assert_eq!(res.payload["query"]["status"], json!("running"));
    }

    #[tokio::test]
    async fn forbidden_leaves_no_record() {
        let mut env = env();
        env.policy = Arc::new(AccessPolicy::from_spec(PolicySpec::default()));
        let c = ctx(json!({ "sql": "SELECT 1", "database_id": "demo" }));
        let err = command(&env, c, 100).run().await.unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert_eq!(env.queries.count(), 0);
    }

    #[tokio::test]
    async fn render_error_leaves_no_record() {
        let env = env();
        let c = ctx(json!({ "sql": "SELECT {{ missing }}", "database_id": "demo" }));
        let err = command(&env, c, 100).run().await.unwrap_err();
        assert_eq!(err.code_str(), "template_render_error");
        assert_eq!(env.queries.count(), 0);
    }

    #[tokio::test]
    async fn template_params_are_rendered_into_the_record() {
        let env = env();
        let c = ctx(json!({
            "sql": "SELECT * FROM events LIMIT {{ n }}",
            "database_id": "demo",
            "templateParams": { "n": 3 },
        }));
        let res = command(&env, c, 100).run().await.unwrap();
        assert_eq!(res.payload["result"]["row_count_total"], json!(3));
        assert_eq!(res.payload["query"]["sql_text"], json!("SELECT * FROM events LIMIT 3"));
    }

    #[tokio::test]
    async fn unknown_database_is_a_validation_error() {
        let env = env();
        let c = ctx(json!({ "sql": "SELECT 1", "database_id": "nope" }));
        let err = command(&env, c, 100).run().await.unwrap_err();
        assert_eq!(err.code_str(), "unknown_database");
        assert_eq!(err.http_status(), 400);
        assert_eq!(env.queries.count(), 0);
    }

    #[tokio::test]
    async fn async_requires_results_backend() {
        let mut env = env();
        env.results = ResultsBackend::disabled();
        let c = ctx(json!({ "sql": "SELECT 1", "database_id": "demo", "runAsync": true }));
        let err = command(&env, c, 100).run().await.unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(env.queries.count(), 0);
    }

    #[tokio::test]
    async fn failed_sync_query_answers_200_with_error_payload() {
        let env = env();
        let c = ctx(json!({ "sql": "SELECT * FROM missing", "database_id": "demo" }));
        let res = command(&env, c, 100).run().await.unwrap();
        assert_eq!(res.status, CommandStatus::Failed);
        assert_eq!(res.http_status(), 200);
        assert_eq!(res.payload["status"], json!("failed"));
        assert_eq!(res.payload["query"]["status"], json!("failed"));
        assert!(res.payload["errors"][0]["message"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn expand_data_false_omits_rows() {
        let env = env();
        let c = ctx(json!({ "sql": "SELECT 1", "database_id": "demo", "expand_data": false }));
        let res = command(&env, c, 100).run().await.unwrap();
        assert!(res.payload["result"].get("rows").is_none());
        assert_eq!(res.payload["result"]["row_count_total"], json!(1));
    }
}
