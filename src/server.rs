//!
//! sqldock HTTP server
//! -------------------
//! This module defines the Axum-based HTTP API for the query dispatch core.
//!
//! Responsibilities:
//! - Submit endpoint: validate, dispatch sync/async, answer 200/202.
//! - Results endpoint: fetch stored result sets by opaque key.
//! - Explicit request-logging middleware around the router.
//! - Background workers for the async queue and the results sweeper.
//! - First-run demo database registration and startup inventory logs.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::FutureExt; // for catch_unwind on async blocks
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::access::AccessPolicy;
use crate::config::AppConfig;
use crate::engine::memory::MemoryEngine;
use crate::engine::{ColumnMeta, EngineRegistry};
use crate::storage::{QueryStore, ResultsBackend};

pub mod context;
pub mod dispatch;
pub mod executor;
pub mod normalize;
pub mod results;

use context::{ExecutePayload, ExecutionContext, ExecutionMode};
use dispatch::ExecuteSqlCommand;
use executor::{spawn_workers, AsynchronousExecutor, QueryTask, SqlExecutor, SynchronousExecutor};
use results::FetchResultsCommand;

const ASYNC_QUEUE_DEPTH: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub queries: QueryStore,
    pub results: ResultsBackend,
    pub engines: EngineRegistry,
    pub policy: Arc<AccessPolicy>,
    pub queue: mpsc::Sender<QueryTask>,
}

impl AppState {
    /// Assemble the full stack: stores, policy, engines, async workers and
    /// the results sweeper. Must run inside a tokio runtime.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let policy = match &config.policy_file {
            Some(path) => {
                let p = std::path::Path::new(path);
                let policy = AccessPolicy::load(p)
                    .map_err(|e| anyhow::anyhow!("failed to load policy file {}: {}", path, e))?;
                info!(target: "startup", "access policy loaded from {}", path);
                policy
            }
            None => {
                info!(target: "startup", "no policy file configured, permitting all callers");
                AccessPolicy::permit_all()
            }
        };

        let queries = QueryStore::new();
        let results = ResultsBackend::new(Some(config.results_ttl));
        let engines = EngineRegistry::new();
        seed_demo_database(&engines);

        let (tx, rx) = mpsc::channel(ASYNC_QUEUE_DEPTH);
        spawn_workers(config.async_workers, rx, queries.clone(), results.clone());
        spawn_results_sweeper(results.clone());

        Ok(Self {
            config: Arc::new(config),
            queries,
            results,
            engines,
            policy: Arc::new(policy),
            queue: tx,
        })
    }
}

/// Background sweeper turning past-due result entries into tombstones.
fn spawn_results_sweeper(results: ResultsBackend) {
    tokio::spawn(async move {
        loop {
            let expired = results.sweep();
            if expired > 0 {
                tracing::debug!(expired = expired, "results_sweep");
            }
            tokio::time::sleep(SWEEP_INTERVAL).await;
        }
    });
}

/// Register the bundled demo database so a fresh install answers queries
/// out of the box.
fn seed_demo_database(engines: &EngineRegistry) {
    let rows = (0..100)
        .map(|i| {
            vec![
                json!(i),
                json!(format!("event-{}", i)),
                json!((i as f64) * 0.5),
            ]
        })
        .collect();
    let engine = MemoryEngine::new().with_table(
        "events",
        vec![
            ColumnMeta::new("id", "bigint"),
            ColumnMeta::new("label", "text"),
            ColumnMeta::new("value", "double precision"),
        ],
        rows,
    );
    engines.register("demo", Arc::new(engine));
    info!(target: "startup", "registered demo database 'demo' with table public.events");
}

fn status_or_500(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Explicit logging stage around the whole router.
async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let response = next.run(req).await;
    info!(
        target: "http",
        %method,
        %uri,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

/// Select the executor variant for this request. Chosen once here; the
/// dispatch command never re-inspects the mode.
fn build_executor(ctx: &ExecutionContext, state: &AppState) -> SqlExecutor {
    match ctx.mode() {
        ExecutionMode::Synchronous => SqlExecutor::Synchronous(SynchronousExecutor {
            timeout: state.config.sync_timeout,
            persist_results: state.config.backend_persistence_enabled,
        }),
        ExecutionMode::Asynchronous => {
            SqlExecutor::Asynchronous(AsynchronousExecutor { queue: state.queue.clone() })
        }
    }
}

async fn execute_handler(
    State(state): State<AppState>,
    Json(payload): Json<ExecutePayload>,
) -> impl IntoResponse {
    let ctx = match ExecutionContext::from_payload(payload) {
        Ok(ctx) => ctx,
        Err(e) => return (status_or_500(e.http_status()), Json(e.errors_body())),
    };
    let executor = build_executor(&ctx, &state);
    let command = ExecuteSqlCommand::new(
        ctx,
        executor,
        state.queries.clone(),
        state.results.clone(),
        state.engines.clone(),
        Arc::clone(&state.policy),
        state.config.max_display_rows,
    );
    let fut = async { command.run().await };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(result)) => (status_or_500(result.http_status()), Json(result.payload)),
        Ok(Err(e)) => (status_or_500(e.http_status()), Json(e.errors_body())),
        Err(panic_payload) => {
            // Convert panics to a 500 error response without crashing the server task
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() { *s }
                      else if let Some(s) = panic_payload.downcast_ref::<String>() { s.as_str() }
                      else { "panic" };
            error!(target: "panic", "execute handler panic: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "errors": [{
                        "error_kind": "internal",
                        "code": "internal_panic",
                        "message": "internal server error",
                        "http_status": 500
                    }]
                })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultsParams {
    key: String,
    rows: Option<usize>,
}

async fn results_handler(
    State(state): State<AppState>,
    Query(params): Query<ResultsParams>,
) -> impl IntoResponse {
    let command = FetchResultsCommand::new(&state.results, state.config.max_display_rows);
    match command.run(&params.key, params.rows) {
        Ok(result_set) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "result": result_set.to_payload(true) })),
        ),
        Err(e) => (status_or_500(e.http_status()), Json(e.errors_body())),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "sqldock ok" }))
        .route("/execute/", post(execute_handler))
        .route("/results/", get(results_handler))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Start the sqldock HTTP server with the given configuration.
pub async fn run_with_config(config: AppConfig) -> anyhow::Result<()> {
    info!(
        target: "startup",
        "sqldock starting: http_port={}, sync_timeout={}s, max_display_rows={}, backend_persistence={}, results_ttl={}s, async_workers={}",
        config.http_port,
        config.sync_timeout.as_secs(),
        config.max_display_rows,
        config.backend_persistence_enabled,
        config.results_ttl.as_secs(),
        config.async_workers
    );
    let http_port = config.http_port;
    let state = AppState::from_config(config)?;
    info!(target: "startup", "databases registered: {}", state.engines.database_ids().join(", "));

    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience entry point using environment-driven configuration.
pub async fn run() -> anyhow::Result<()> {
    run_with_config(AppConfig::from_env()).await
}
