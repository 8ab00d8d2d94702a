//! Immutable service configuration.
//! Built once at startup from environment variables (and CLI flags in the
//! binary) and passed by reference into each component; nothing reads the
//! environment after construction.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP API port.
    pub http_port: u16,
    /// Budget for one synchronous execution before it is cancelled.
    pub sync_timeout: Duration,
    /// Maximum rows returned to a client regardless of total rows produced.
    pub max_display_rows: usize,
    /// When enabled, synchronous results are also written to the results
    /// backend so they can be re-fetched by key.
    pub backend_persistence_enabled: bool,
    /// How long a stored result set stays fetchable before it expires.
    pub results_ttl: Duration,
    /// Number of background workers draining the asynchronous queue.
    pub async_workers: usize,
    /// Optional path to an access policy JSON file. None means permit-all.
    pub policy_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: 7979,
            sync_timeout: Duration::from_secs(30),
            max_display_rows: 1000,
            backend_persistence_enabled: true,
            results_ttl: Duration::from_secs(24 * 3600),
            async_workers: 4,
            policy_file: None,
        }
    }
}

pub fn parse_u64_env(name: &str) -> Option<u64> {
    match env::var(name) {
        Ok(val) => val.parse::<u64>().ok(),
        Err(_) => None,
    }
}

pub fn parse_port_env(name: &str) -> Option<u16> {
    match env::var(name) {
        Ok(val) => val.parse::<u16>().ok(),
        Err(_) => None,
    }
}

pub fn parse_bool_env(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(v) => {
            let s = v.to_lowercase();
            match s.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        }
        Err(_) => None,
    }
}

impl AppConfig {
    /// Environment variables override the defaults; unparseable values are
    /// ignored rather than fatal.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(p) = parse_port_env("SQLDOCK_HTTP_PORT") { cfg.http_port = p; }
        if let Some(s) = parse_u64_env("SQLDOCK_SYNC_TIMEOUT_SECS") { cfg.sync_timeout = Duration::from_secs(s); }
        if let Some(n) = parse_u64_env("SQLDOCK_MAX_DISPLAY_ROWS") { cfg.max_display_rows = n as usize; }
        if let Some(b) = parse_bool_env("SQLDOCK_BACKEND_PERSISTENCE") { cfg.backend_persistence_enabled = b; }
        if let Some(s) = parse_u64_env("SQLDOCK_RESULTS_TTL_SECS") { cfg.results_ttl = Duration::from_secs(s); }
        if let Some(n) = parse_u64_env("SQLDOCK_ASYNC_WORKERS") { cfg.async_workers = (n as usize).max(1); }
        if let Ok(p) = env::var("SQLDOCK_POLICY_FILE") {
            if !p.trim().is_empty() { cfg.policy_file = Some(p); }
        }
        cfg
    }
}
