//! Results backend.
//! Opaque-string-keyed store for completed result sets. Keys are write-once:
//! a written key is immutable until it expires, and an expired key leaves a
//! tombstone behind so retrieval can tell "gone" apart from "never existed".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::engine::{ColumnMeta, Row};
use crate::error::{AppError, AppResult};

/// How long a reader waits on the store lock before reporting a backend
/// access timeout instead of blocking the request.
const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw result set as persisted, before any display capping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    pub query_id: Uuid,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}

enum Slot {
    Live { value: Arc<StoredResult>, expires_at: Option<Instant> },
    Expired,
}

/// Shared handle over the key space. A disabled backend accepts no reads or
/// writes and reports itself as such.
#[derive(Clone)]
pub struct ResultsBackend {
    enabled: bool,
    ttl: Option<Duration>,
    map: Arc<parking_lot::RwLock<HashMap<String, Slot>>>,
}

impl ResultsBackend {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self { enabled: true, ttl, map: Arc::new(parking_lot::RwLock::new(HashMap::new())) }
    }

    pub fn disabled() -> Self {
        Self { enabled: false, ttl: None, map: Arc::new(parking_lot::RwLock::new(HashMap::new())) }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn disabled_error() -> AppError {
        AppError::backend("results_backend_error", "results backend is not configured")
    }

    /// Write a result set under `key`. Keys are immutable once written.
    pub fn put(&self, key: &str, value: StoredResult) -> AppResult<()> {
        if !self.enabled {
            return Err(Self::disabled_error());
        }
        let mut map = self.map.try_write_for(LOCK_TIMEOUT).ok_or_else(|| {
            AppError::backend_timeout("results_backend_timeout", "timed out acquiring results store")
        })?;
        if map.contains_key(key) {
            return Err(AppError::conflict(
                "results_key_exists".to_string(),
                format!("results key '{}' is already written", key),
            ));
        }
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        map.insert(key.to_string(), Slot::Live { value: Arc::new(value), expires_at });
        Ok(())
    }

    /// Look up a stored result set. Unknown keys are not-found, expired keys
    /// are gone, and lock starvation is a backend timeout.
    pub fn get(&self, key: &str) -> AppResult<Arc<StoredResult>> {
        if !self.enabled {
            return Err(Self::disabled_error());
        }
        let map = self.map.try_read_for(LOCK_TIMEOUT).ok_or_else(|| {
            AppError::backend_timeout("results_backend_timeout", "timed out acquiring results store")
        })?;
        match map.get(key) {
            None => Err(AppError::not_found(
                "results_key_not_found".to_string(),
                format!("no results stored under key '{}'", key),
            )),
            Some(Slot::Expired) => Err(AppError::gone(
                "results_expired".to_string(),
                format!("results under key '{}' have expired", key),
            )),
            Some(Slot::Live { value, expires_at }) => {
                if expires_at.map(|t| t <= Instant::now()).unwrap_or(false) {
                    // Past due but not yet swept; report gone without waiting
                    // for the sweeper.
                    return Err(AppError::gone(
                        "results_expired".to_string(),
                        format!("results under key '{}' have expired", key),
                    ));
                }
                Ok(Arc::clone(value))
            }
        }
    }

    /// Replace past-due entries with tombstones, freeing their payloads.
    /// Returns the number of entries expired.
    pub fn sweep(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let now = Instant::now();
        let mut map = self.map.write();
        let mut expired = 0usize;
        for slot in map.values_mut() {
            if let Slot::Live { expires_at: Some(t), .. } = slot {
                if *t <= now {
                    *slot = Slot::Expired;
                    expired += 1;
                }
            }
        }
        expired
    }
}

/// Generate an opaque results key: 16 random bytes, hex-encoded.
pub fn opaque_key() -> String {
    let mut bytes = [0u8; 16];
    let _ = getrandom::getrandom(&mut bytes);
    let mut key = String::with_capacity(32);
    for b in &bytes {
        let _ = write!(&mut key, "{:02x}", b);
    }
    key
}
