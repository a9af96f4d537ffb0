use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("true" | "1" | "yes") => true,
        Some("false" | "0" | "no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub agent: AgentConfig,
    pub statements: StatementsConfig,
    pub tools: ToolsConfig,
    pub http: HttpConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TALKDATA_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TALKDATA_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            agent: AgentConfig::from_env_profiled(p),
            statements: StatementsConfig::from_env_profiled(p),
            tools: ToolsConfig::from_env_profiled(p),
            http: HttpConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings that would only fail later, mid-turn.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("AGENT_URL", &self.agent.url)?;
        check_url("STATEMENTS_URL", &self.statements.url)?;
        if self.tools.search_max_results == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SEARCH_MAX_RESULTS".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  agent:       url={}, model={}", self.agent.url, self.agent.model);
        tracing::info!(
            "  statements:  url={}, warehouse={}",
            self.statements.url,
            self.statements.warehouse.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  tools:       search={}, semantic_model={}",
            self.tools.search_service.as_deref().unwrap_or("(none)"),
            self.tools.semantic_model_file.as_deref().unwrap_or("(none)")
        );
    }

    /// Return a redacted view safe for display (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "agent": {
                "url": self.agent.url,
                "model": self.agent.model,
                "authenticated": self.agent.auth_token.is_some(),
                "related_queries": self.agent.related_queries,
            },
            "statements": {
                "url": self.statements.url,
                "warehouse": self.statements.warehouse,
            },
            "tools": {
                "search_tool_name": self.tools.search_tool_name,
                "search_service": self.tools.search_service,
                "search_max_results": self.tools.search_max_results,
                "semantic_model_file": self.tools.semantic_model_file,
            },
            "http": { "connect_timeout_secs": self.http.connect_timeout_secs },
        })
    }
}

fn check_url(key: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl(key.to_string(), url.to_string()))
    }
}

// ── Agent service ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Full URL of the agent `:run` endpoint (usually the local proxy).
    pub url: String,
    pub model: String,
    pub auth_token: Option<String>,
    /// Sent as `X-Snowflake-Authorization-Token-Type` when a token is set.
    pub auth_token_type: Option<String>,
    pub related_queries: bool,
}

impl AgentConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_or(p, "AGENT_URL", "http://localhost:3001/agent"),
            model: profiled_env_or(p, "AGENT_MODEL", "claude-3-5-sonnet"),
            auth_token: profiled_env_opt(p, "AGENT_AUTH_TOKEN"),
            auth_token_type: profiled_env_opt(p, "AGENT_AUTH_TOKEN_TYPE"),
            related_queries: profiled_env_bool(p, "AGENT_RELATED_QUERIES", true),
        }
    }
}

// ── SQL statements service ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementsConfig {
    pub url: String,
    pub warehouse: Option<String>,
}

impl StatementsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_or(p, "STATEMENTS_URL", "http://localhost:3001/statements"),
            warehouse: profiled_env_opt(p, "SNOWFLAKE_WAREHOUSE"),
        }
    }
}

// ── Agent tools ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Name of the full-text search tool; its tool_use events delay the
    /// streaming state by one event.
    pub search_tool_name: String,
    pub search_service: Option<String>,
    pub search_max_results: u32,
    pub semantic_model_file: Option<String>,
}

impl ToolsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            search_tool_name: profiled_env_or(p, "SEARCH_TOOL_NAME", "search1"),
            search_service: profiled_env_opt(p, "SEARCH_SERVICE_PATH"),
            search_max_results: profiled_env_u32(p, "SEARCH_MAX_RESULTS", 10),
            semantic_model_file: profiled_env_opt(p, "SEMANTIC_MODEL_PATH"),
        }
    }
}

// ── HTTP client ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u32,
}

impl HttpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            connect_timeout_secs: profiled_env_u32(p, "HTTP_CONNECT_TIMEOUT_SECS", 10),
        }
    }
}
