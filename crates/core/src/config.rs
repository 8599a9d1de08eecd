use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GeoError;

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

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub tool_server: ToolServerConfig,
    pub tool_call: ToolCallConfig,
    pub conversation: ConversationConfig,
    pub llm: LlmConfig,
    pub proxy: ProxyConfig,
    pub server: ServerConfig,
    pub log_level: String,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `GEOLOOP_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("GEOLOOP_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            tool_server: ToolServerConfig::from_env_profiled(p),
            tool_call: ToolCallConfig::from_env_profiled(p),
            conversation: ConversationConfig::from_env_profiled(p),
            llm: LlmConfig::from_env_profiled(p),
            proxy: ProxyConfig::from_env_profiled(p),
            server: ServerConfig::from_env_profiled(p),
            log_level: profiled_env_or(p, "LOG_LEVEL", "info").to_lowercase(),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Check that the selected provider and the tool provider are usable.
    pub fn validate(&self) -> Result<(), GeoError> {
        self.llm.validate()?;
        if self.tool_server.api_key.is_none() {
            return Err(GeoError::Validation(
                "AMAP_MAPS_API_KEY is required to start the tool provider".into(),
            ));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  tool_server:  command={} {}",
            self.tool_server.command,
            self.tool_server.args.join(" ")
        );
        tracing::info!(
            "  tool_call:    timeout={}s, attempts={}, delay={}s",
            self.tool_call.timeout_secs,
            self.tool_call.retry_count,
            self.tool_call.retry_delay_secs
        );
        tracing::info!(
            "  conversation: max_iterations={}",
            self.conversation.max_iterations
        );
        tracing::info!(
            "  llm:          provider={}, model={}",
            self.llm.provider,
            self.llm.active_model()
        );
        tracing::info!("  proxy:        enabled={}", self.proxy.enabled);
        tracing::info!("  server:       {}:{}", self.server.host, self.server.port);
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "tool_server": {
                "command": self.tool_server.command,
                "args": self.tool_server.args,
                "api_key_configured": self.tool_server.api_key.is_some(),
            },
            "tool_call": {
                "timeout_secs": self.tool_call.timeout_secs,
                "retry_count": self.tool_call.retry_count,
                "retry_delay_secs": self.tool_call.retry_delay_secs,
            },
            "conversation": { "max_iterations": self.conversation.max_iterations },
            "llm": {
                "provider": self.llm.provider,
                "model": self.llm.active_model(),
                "configured": self.llm.is_configured(),
            },
            "proxy": { "enabled": self.proxy.enabled },
            "server": { "host": self.server.host, "port": self.server.port },
        })
    }
}

// ── Tool provider subprocess ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub api_key: Option<String>,
    /// Name of the environment variable the subprocess reads its key from.
    pub api_key_env: String,
    pub settle_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl ToolServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            command: profiled_env_or(p, "AMAP_SERVER_COMMAND", "npx"),
            args: split_args(&profiled_env_or(
                p,
                "AMAP_SERVER_ARGS",
                "-y,@amap/amap-maps-mcp-server",
            )),
            api_key: profiled_env_opt(p, "AMAP_MAPS_API_KEY"),
            api_key_env: profiled_env_or(p, "TOOL_SERVER_API_KEY_ENV", "AMAP_MAPS_API_KEY"),
            settle_ms: profiled_env_parse(p, "TOOL_SERVER_SETTLE_MS", 2000),
            shutdown_grace_ms: profiled_env_parse(p, "TOOL_SERVER_SHUTDOWN_GRACE_MS", 5000),
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Split a comma separated argument list, dropping empty entries.
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect()
}

// ── Tool invocation ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallConfig {
    pub timeout_secs: u64,
    /// Total attempts, including the first one.
    pub retry_count: u32,
    pub retry_delay_secs: f64,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl ToolCallConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            timeout_secs: profiled_env_parse(p, "MCP_SERVER_TIMEOUT", 30),
            retry_count: profiled_env_parse(p, "MCP_RETRY_COUNT", 3),
            retry_delay_secs: profiled_env_parse(p, "MCP_RETRY_DELAY", 1.0),
            backoff_factor: profiled_env_parse(p, "MCP_RETRY_BACKOFF", 2.0),
            jitter: profiled_env_bool(p, "MCP_RETRY_JITTER", false),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs.max(0.0))
    }
}

// ── Conversation loop ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub max_iterations: usize,
    /// Total attempts for the first model call of a query.
    pub llm_retry_attempts: u32,
    pub query_timeout_secs: u64,
}

impl ConversationConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_iterations: profiled_env_parse(p, "TOOL_MAX_ITERATIONS", 10),
            llm_retry_attempts: profiled_env_parse(p, "LLM_RETRY_ATTEMPTS", 2),
            query_timeout_secs: profiled_env_parse(p, "QUERY_TIMEOUT_SECS", 120),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

// ── LLM (Claude / OpenAI) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "claude" or "openai"
    pub provider: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub claude_model: String,
    pub claude_max_tokens: u32,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_max_tokens: u32,
    pub openai_temperature: f32,
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: normalize_provider(&profiled_env_or(p, "LLM_PROVIDER", "claude")),
            anthropic_api_key: profiled_env_opt(p, "ANTHROPIC_API_KEY"),
            anthropic_base_url: profiled_env_or(p, "ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
            claude_model: profiled_env_or(p, "CLAUDE_MODEL", "claude-3-7-sonnet-20250219"),
            claude_max_tokens: profiled_env_parse(p, "CLAUDE_MAX_TOKENS", 1000),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_base_url: profiled_env_or(p, "OPENAI_BASE_URL", "https://api.openai.com"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4"),
            openai_max_tokens: profiled_env_parse(p, "OPENAI_MAX_TOKENS", 1000),
            openai_temperature: profiled_env_parse(p, "OPENAI_TEMPERATURE", 0.7),
            request_timeout_secs: profiled_env_parse(p, "LLM_REQUEST_TIMEOUT_SECS", 60),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn active_model(&self) -> &str {
        match self.provider.as_str() {
            "openai" => &self.openai_model,
            _ => &self.claude_model,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.validate().is_ok()
    }

    /// Same config with a different provider selected.
    pub fn with_provider(&self, provider: &str) -> Self {
        let mut cfg = self.clone();
        cfg.provider = normalize_provider(provider);
        cfg
    }

    pub fn validate(&self) -> Result<(), GeoError> {
        match self.provider.as_str() {
            "claude" => {
                if self.anthropic_api_key.is_none() {
                    return Err(GeoError::Validation(
                        "ANTHROPIC_API_KEY is required when LLM_PROVIDER=claude".into(),
                    ));
                }
            }
            "openai" => {
                if self.openai_api_key.is_none() {
                    return Err(GeoError::Validation(
                        "OPENAI_API_KEY is required when LLM_PROVIDER=openai".into(),
                    ));
                }
                if self.openai_model.trim().is_empty() {
                    return Err(GeoError::Validation(
                        "OPENAI_MODEL is required when LLM_PROVIDER=openai".into(),
                    ));
                }
            }
            other => {
                return Err(GeoError::Validation(format!(
                    "unsupported LLM provider '{}', expected one of: claude, openai",
                    other
                )));
            }
        }
        Ok(())
    }
}

fn normalize_provider(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "anthropic" => "claude".to_string(),
        other => other.to_string(),
    }
}

// ── Outbound proxy ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub all_proxy: Option<String>,
}

impl ProxyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            enabled: profiled_env_bool(p, "PROXY_ENABLED", false),
            http_proxy: profiled_env_opt(p, "HTTP_PROXY"),
            https_proxy: profiled_env_opt(p, "HTTPS_PROXY"),
            all_proxy: profiled_env_opt(p, "ALL_PROXY"),
        }
    }

    /// The single proxy URL to apply: https first, then http, then all.
    pub fn effective(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.https_proxy
            .as_deref()
            .or(self.http_proxy.as_deref())
            .or(self.all_proxy.as_deref())
    }
}

// ── HTTP front-end ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "API_HOST", "127.0.0.1"),
            port: profiled_env_parse(p, "API_PORT", 8000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}
