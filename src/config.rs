// src/config.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use tracing::{debug, info};

/// Server configuration loaded once from the environment at startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub kg_url: String,
    pub codex_mcp_enabled: bool,
    pub codex_path: String,
    pub codex_sandbox: String,
    pub codex_approval_policy: String,
    pub codex_base_instructions: Option<String>,
    pub event_log_ttl_secs: u64,
    pub event_log_cap: usize,
    pub queue_poll_interval_ms: u64,
    pub queue_sweep_interval_secs: u64,
}

impl BridgeConfig {
    /// Load configuration from environment variables (single source of truth).
    pub fn from_env() -> Self {
        let port = parse_env("PORT", 3790u16);
        let db_path = std::env::var("DB_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);
        let kg_url = std::env::var("KG_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:3789".to_string());
        let codex_mcp_enabled = parse_bool_env("CODEX_MCP_ENABLED").unwrap_or(true);
        let codex_path = std::env::var("CODEX_PATH").unwrap_or_else(|_| "codex".to_string());
        let codex_sandbox =
            std::env::var("CODEX_SANDBOX").unwrap_or_else(|_| "workspace-read".to_string());
        let codex_approval_policy =
            std::env::var("CODEX_APPROVAL_POLICY").unwrap_or_else(|_| "never".to_string());
        let codex_base_instructions = std::env::var("CODEX_BASE_INSTRUCTIONS")
            .ok()
            .filter(|s| !s.is_empty());

        let event_log_ttl_secs = parse_env("EVENT_LOG_TTL_SECS", 15 * 60u64);
        let event_log_cap = parse_env("EVENT_LOG_CAP", 5000usize);
        let queue_poll_interval_ms = parse_env("QUEUE_POLL_INTERVAL_MS", 5000u64);
        let queue_sweep_interval_secs = parse_env("QUEUE_SWEEP_INTERVAL_SECS", 5 * 60u64);

        let config = Self {
            port,
            db_path,
            kg_url,
            codex_mcp_enabled,
            codex_path,
            codex_sandbox,
            codex_approval_policy,
            codex_base_instructions,
            event_log_ttl_secs,
            event_log_cap,
            queue_poll_interval_ms,
            queue_sweep_interval_secs,
        };
        config.log_summary();
        config
    }

    fn log_summary(&self) {
        info!(port = self.port, db_path = %self.db_path.display(), "configuration loaded");
        debug!(
            codex_mcp_enabled = self.codex_mcp_enabled,
            codex_path = %self.codex_path,
            "codex peer configuration"
        );
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local-data")
        .join("store.sqlite")
}

fn parse_bool_env(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
