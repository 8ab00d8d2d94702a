//!
//! sqldock server binary
//! ---------------------
//! Command-line entry point for the sqldock HTTP server. Supports
//! configuration via CLI flags and environment variables; flags win.

use std::env;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sqldock::config::AppConfig;

fn parse_u64_arg(args: &[String], flag: &str) -> Option<u64> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return args[i + 1].parse::<u64>().ok();
            }
        i += 1;
    }
    None
}

fn parse_string_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return Some(args[i + 1].clone());
            }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!(
            "sqldock server\n\nUSAGE:\n  sqldock [--http-port N] [--sync-timeout SECS] [--max-display-rows N] [--no-backend-persistence] [--policy-file PATH]\n\nOPTIONS:\n  --http-port N              HTTP API port (env: SQLDOCK_HTTP_PORT, default 7979)\n  --sync-timeout SECS        Synchronous execution budget (env: SQLDOCK_SYNC_TIMEOUT_SECS, default 30)\n  --max-display-rows N       Display row cap (env: SQLDOCK_MAX_DISPLAY_ROWS, default 1000)\n  --no-backend-persistence   Do not persist synchronous results (env: SQLDOCK_BACKEND_PERSISTENCE)\n  --policy-file PATH         Access policy JSON (env: SQLDOCK_POLICY_FILE, default permit-all)\n"
        );
        return Ok(());
    }

    let mut config = AppConfig::from_env();
    if let Some(p) = parse_u64_arg(&args, "--http-port") { config.http_port = p as u16; }
    if let Some(s) = parse_u64_arg(&args, "--sync-timeout") { config.sync_timeout = Duration::from_secs(s); }
    if let Some(n) = parse_u64_arg(&args, "--max-display-rows") { config.max_display_rows = n as usize; }
    if has_flag(&args, "--no-backend-persistence") { config.backend_persistence_enabled = false; }
    if let Some(p) = parse_string_arg(&args, "--policy-file") { config.policy_file = Some(p); }

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "sqldock",
        "sqldock starting: RUST_LOG='{}', http_port={}",
        rust_log, config.http_port
    );

    sqldock::server::run_with_config(config).await
}
