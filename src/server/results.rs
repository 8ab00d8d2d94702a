//! Results retrieval.
//! Serves a previously computed result set by its opaque key, reusing the
//! same normalization path as fresh executions. Stored data is never
//! mutated; a narrower `rows` request just caps the returned slice.

use crate::engine::EngineResult;
use crate::error::AppResult;
use crate::server::normalize::{normalize, ResultSet};
use crate::storage::ResultsBackend;

pub struct FetchResultsCommand<'a> {
    backend: &'a ResultsBackend,
    max_display_rows: usize,
}

impl<'a> FetchResultsCommand<'a> {
    pub fn new(backend: &'a ResultsBackend, max_display_rows: usize) -> Self {
        Self { backend, max_display_rows }
    }

    /// Fetch the result set stored under `key`. `rows` narrows the returned
    /// row count further; the global display cap always applies.
    pub fn run(&self, key: &str, rows: Option<usize>) -> AppResult<ResultSet> {
        let stored = self.backend.get(key)?;
        let cap = rows.map(|r| r.min(self.max_display_rows)).unwrap_or(self.max_display_rows);
        let raw = EngineResult { columns: stored.columns.clone(), rows: stored.rows.clone() };
        Ok(normalize(&raw, cap, stored.query_id))
    }
}
