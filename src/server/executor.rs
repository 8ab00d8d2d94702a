//! Executor strategies.
//! Two variants behind one tagged union, chosen once at dispatch time: the
//! synchronous executor blocks the request task inside a time budget (that
//! blocking is the backpressure mechanism), the asynchronous executor hands
//! the work to the background queue and returns a running receipt at once.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{EngineQuery, EngineResult, SqlEngine};
use crate::error::{AppError, AppResult};
use crate::storage::{QueryStatus, QueryStore, ResultsBackend, StoredResult};

/// What a single executor invocation produced.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Synchronous completion with the raw, uncapped result.
    Completed { raw: EngineResult },
    /// Asynchronous hand-off; the caller polls `/results/` with the key.
    Running { results_key: String },
    /// The query ran and failed (including timeout). The record is already
    /// finalized; the error rides in the response payload.
    Failed { error: AppError },
}

/// One unit of background work, queued by the asynchronous executor.
pub struct QueryTask {
    pub query_id: Uuid,
    pub results_key: String,
    pub engine: Arc<dyn SqlEngine>,
    pub query: EngineQuery,
}

/// Everything an executor needs for one invocation.
pub struct ExecutionRequest {
    pub query_id: Uuid,
    pub results_key: String,
    pub engine: Arc<dyn SqlEngine>,
    pub query: EngineQuery,
}

pub struct SynchronousExecutor {
    pub timeout: Duration,
    /// When set, completed synchronous results are also written to the
    /// results backend so they stay fetchable by key.
    pub persist_results: bool,
}

pub struct AsynchronousExecutor {
    pub queue: mpsc::Sender<QueryTask>,
}

pub enum SqlExecutor {
    Synchronous(SynchronousExecutor),
    Asynchronous(AsynchronousExecutor),
}

impl SqlExecutor {
    pub async fn execute(
        &self,
        req: ExecutionRequest,
        queries: &QueryStore,
        results: &ResultsBackend,
    ) -> AppResult<ExecutionOutcome> {
        match self {
            SqlExecutor::Synchronous(sync) => sync.execute(req, queries, results).await,
            SqlExecutor::Asynchronous(run_async) => run_async.execute(req, queries).await,
        }
    }
}

impl SynchronousExecutor {
    async fn execute(
        &self,
        req: ExecutionRequest,
        queries: &QueryStore,
        results: &ResultsBackend,
    ) -> AppResult<ExecutionOutcome> {
        queries.mark_running(req.query_id)?;
        match tokio::time::timeout(self.timeout, req.engine.run_sql(&req.query)).await {
            Err(_elapsed) => {
                // Dropping the engine future cancels the in-flight call.
                let message = format!(
                    "query exceeded the synchronous time budget of {}s",
                    self.timeout.as_secs()
                );
                queries.fail(req.query_id, QueryStatus::TimedOut, message.clone())?;
                Ok(ExecutionOutcome::Failed {
                    error: AppError::timeout("execution_timeout".to_string(), message),
                })
            }
            Ok(Err(engine_err)) => {
                let message = engine_err.to_string();
                queries.fail(req.query_id, QueryStatus::Failed, message.clone())?;
                Ok(ExecutionOutcome::Failed {
                    error: AppError::execution("execution_failure".to_string(), message),
                })
            }
            Ok(Ok(raw)) => {
                queries.complete(req.query_id, raw.rows.len())?;
                if self.persist_results && results.is_enabled() {
                    let stored = StoredResult {
                        query_id: req.query_id,
                        columns: raw.columns.clone(),
                        rows: raw.rows.clone(),
                    };
                    if let Err(e) = results.put(&req.results_key, stored) {
                        // The execution itself succeeded; losing the cached
                        // copy only disables later re-fetch by key.
                        warn!(query_id = %req.query_id, "failed to persist sync results: {}", e);
                    }
                }
                Ok(ExecutionOutcome::Completed { raw })
            }
        }
    }
}

impl AsynchronousExecutor {
    async fn execute(&self, req: ExecutionRequest, queries: &QueryStore) -> AppResult<ExecutionOutcome> {
        // The record must already read as running when the receipt goes out.
        queries.mark_running(req.query_id)?;
        let results_key = req.results_key.clone();
        let task = QueryTask {
            query_id: req.query_id,
            results_key: req.results_key,
            engine: req.engine,
            query: req.query,
        };
        if self.queue.send(task).await.is_err() {
            queries.fail(req.query_id, QueryStatus::Failed, "worker queue unavailable")?;
            return Err(AppError::internal("worker_queue_closed", "worker queue unavailable"));
        }
        Ok(ExecutionOutcome::Running { results_key })
    }
}

/// Spawn the background worker pool draining the asynchronous queue.
pub fn spawn_workers(
    count: usize,
    rx: mpsc::Receiver<QueryTask>,
    queries: QueryStore,
    results: ResultsBackend,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for worker in 0..count.max(1) {
        let rx = Arc::clone(&rx);
        let queries = queries.clone();
        let results = results.clone();
        tokio::spawn(async move {
            loop {
                let task = { rx.lock().await.recv().await };
                let Some(task) = task else { break };
                info!(target: "worker", worker, query_id = %task.query_id, "picked up query");
                run_task(task, &queries, &results).await;
            }
        });
    }
}

async fn run_task(task: QueryTask, queries: &QueryStore, results: &ResultsBackend) {
    match task.engine.run_sql(&task.query).await {
        Ok(raw) => {
            let row_count = raw.rows.len();
            let stored = StoredResult { query_id: task.query_id, columns: raw.columns, rows: raw.rows };
            if let Err(e) = results.put(&task.results_key, stored) {
                warn!(target: "worker", query_id = %task.query_id, "result persistence failed: {}", e);
                if let Err(e) = queries.fail(task.query_id, QueryStatus::Failed, e.to_string()) {
                    warn!(target: "worker", query_id = %task.query_id, "record finalize failed: {}", e);
                }
                return;
            }
            match queries.complete(task.query_id, row_count) {
                Ok(_) => info!(target: "worker", query_id = %task.query_id, rows = row_count, "query finished"),
                Err(e) => warn!(target: "worker", query_id = %task.query_id, "record finalize failed: {}", e),
            }
        }
        Err(engine_err) => {
            let message = engine_err.to_string();
            if let Err(e) = queries.fail(task.query_id, QueryStatus::Failed, message.clone()) {
                warn!(target: "worker", query_id = %task.query_id, "record finalize failed: {}", e);
            }
            info!(target: "worker", query_id = %task.query_id, "query failed: {}", message);
        }
    }
}
