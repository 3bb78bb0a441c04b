// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use tracing::{debug, warn};

/// Default content-file retention window in days
const DEFAULT_CONTENT_RETENTION_DAYS: u32 = 30;
/// Default pipeline-trace retention window in days
const DEFAULT_TRACE_RETENTION_DAYS: u32 = 7;
/// Default dispatcher tick interval in minutes
const DEFAULT_POLL_TICK_MINUTES: u64 = 5;

/// Process configuration loaded from environment variables.
///
/// LLM provider credentials are deliberately absent here: they are managed
/// through the settings store (`llm_assignments`) so they can be rotated
/// without a restart.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// SQLite database path (KF_DB_PATH)
    pub db_path: PathBuf,
    /// Root directory for per-article content files (KF_CONTENT_ROOT)
    pub content_root: PathBuf,
    /// Admin HTTP bind address (KF_BIND)
    pub bind_addr: String,
    /// Base URL of the RSS hub that serves feed routes as JSON (KF_RSSHUB_URL)
    pub rsshub_url: String,
    /// Dispatcher tick interval in minutes (KF_POLL_TICK_MINUTES)
    pub poll_tick_minutes: u64,
    /// Content-file retention in days (KF_CONTENT_RETENTION_DAYS)
    pub content_retention_days: u32,
    /// Trace-event retention in days (KF_TRACE_RETENTION_DAYS)
    pub trace_retention_days: u32,
    /// Workers draining the scrape queue (KF_SCRAPE_WORKERS)
    pub scrape_workers: usize,
    /// Workers draining the LLM queue (KF_LLM_WORKERS)
    pub llm_workers: usize,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let db_path = read_var("KF_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("kingfisher.db"));

        let content_root = read_var("KF_CONTENT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("news_content"));

        let bind_addr = read_var("KF_BIND").unwrap_or_else(|| "127.0.0.1:8844".to_string());

        let rsshub_url =
            read_var("KF_RSSHUB_URL").unwrap_or_else(|| "http://localhost:1200".to_string());

        let config = Self {
            db_path,
            content_root,
            bind_addr,
            rsshub_url,
            poll_tick_minutes: parse_var("KF_POLL_TICK_MINUTES", DEFAULT_POLL_TICK_MINUTES),
            content_retention_days: parse_var(
                "KF_CONTENT_RETENTION_DAYS",
                DEFAULT_CONTENT_RETENTION_DAYS,
            ),
            trace_retention_days: parse_var(
                "KF_TRACE_RETENTION_DAYS",
                DEFAULT_TRACE_RETENTION_DAYS,
            ),
            scrape_workers: parse_var("KF_SCRAPE_WORKERS", 4usize),
            llm_workers: parse_var("KF_LLM_WORKERS", 2usize),
        };

        debug!(
            db = %config.db_path.display(),
            content_root = %config.content_root.display(),
            bind = %config.bind_addr,
            "Environment configuration loaded"
        );

        config
    }
}

/// Read an env var, filtering empty values
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an env var with a fallback default
fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match read_var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "Unparseable env var, using default");
            default
        }),
        None => default,
    }
}
