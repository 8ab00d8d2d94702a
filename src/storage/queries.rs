//! Query record store.
//! One record per dispatched execution attempt. Status only ever moves
//! forward along pending -> running -> terminal; the store rejects anything
//! else so a finished query can never be resurrected by a late writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Running,
    Success,
    Failed,
    TimedOut,
    Stopped,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueryStatus::Success | QueryStatus::Failed | QueryStatus::TimedOut | QueryStatus::Stopped
        )
    }

    fn can_transition_to(self, next: QueryStatus) -> bool {
        match self {
            QueryStatus::Pending => next == QueryStatus::Running,
            QueryStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Persistent view of one execution attempt. `sql_text` holds the rendered
/// statement, not the submitted template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: Uuid,
    pub client_id: String,
    pub sql_text: String,
    pub database_id: String,
    pub schema_name: String,
    pub status: QueryStatus,
    pub submitted_by: String,
    pub results_key: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub row_count: Option<usize>,
    pub error_message: Option<String>,
}

/// Shared handle over the record map. Writes are short critical sections;
/// readers get owned snapshots.
#[derive(Clone, Default)]
pub struct QueryStore {
    inner: Arc<parking_lot::RwLock<HashMap<Uuid, QueryRecord>>>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: QueryRecord) -> AppResult<()> {
        let mut map = self.inner.write();
        if map.contains_key(&record.id) {
            return Err(AppError::conflict(
                "query_record_exists".to_string(),
                format!("query record {} already exists", record.id),
            ));
        }
        map.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<QueryRecord> {
        self.inner.read().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    fn transition<F>(&self, id: Uuid, next: QueryStatus, mutate: F) -> AppResult<QueryRecord>
    where
        F: FnOnce(&mut QueryRecord),
    {
        let mut map = self.inner.write();
        let record = map.get_mut(&id).ok_or_else(|| {
            AppError::not_found("query_record_not_found".to_string(), format!("no query record {}", id))
        })?;
        if !record.status.can_transition_to(next) {
            return Err(AppError::conflict(
                "invalid_status_transition".to_string(),
                format!("query {} cannot move from {:?} to {:?}", id, record.status, next),
            ));
        }
        record.status = next;
        if next.is_terminal() {
            record.ended_at = Some(Utc::now());
        }
        mutate(record);
        Ok(record.clone())
    }

    pub fn mark_running(&self, id: Uuid) -> AppResult<QueryRecord> {
        self.transition(id, QueryStatus::Running, |_| {})
    }

    pub fn complete(&self, id: Uuid, row_count: usize) -> AppResult<QueryRecord> {
        self.transition(id, QueryStatus::Success, |r| {
            r.row_count = Some(row_count);
        })
    }

    /// Terminal failure; `status` must be one of Failed, TimedOut or Stopped.
    pub fn fail(&self, id: Uuid, status: QueryStatus, message: impl Into<String>) -> AppResult<QueryRecord> {
        if !status.is_terminal() || status == QueryStatus::Success {
            return Err(AppError::internal(
                "invalid_failure_status".to_string(),
                format!("{:?} is not a failure status", status),
            ));
        }
        self.transition(id, status, |r| {
            r.error_message = Some(message.into());
        })
    }
}
