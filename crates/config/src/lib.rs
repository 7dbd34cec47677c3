//! Configuration loading, validation, and management for taskloop.
//!
//! Loads configuration from `~/.taskloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant with web browsing tools. Use them to answer questions.";

/// The root configuration structure.
///
/// Maps directly to `~/.taskloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the inference service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Inference provider ("openai", "openrouter", "ollama", or a custom name with `api_url`)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Override the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response (provider default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// System preamble placed before the history on every model query
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("agent", &self.agent)
            .field("conversation", &self.conversation)
            .field("tools", &self.tools)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// Agent loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum model rounds per request (safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Number of most recent history entries shown to the model
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Run the calls of one batch concurrently
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,

    /// Per tool call timeout (0 = none)
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Whole-request timeout (0 = none)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_history_window() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_tool_timeout() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    300
}

impl AgentSettings {
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_window: default_history_window(),
            parallel_tool_calls: true,
            tool_timeout_secs: default_tool_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Which conversation a request lands in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationScope {
    /// One long-lived conversation for the whole process
    #[default]
    Shared,
    /// One conversation per session id
    PerSession,
}

/// What to do when a conversation is already running a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the running cycle to finish
    #[default]
    Queue,
    /// Fail immediately
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default)]
    pub scope: ConversationScope,

    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Conversations kept in memory; the least recently used idle one is evicted past this
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

fn default_max_conversations() -> usize {
    1000
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            scope: ConversationScope::default(),
            busy_policy: BusyPolicy::default(),
            max_conversations: default_max_conversations(),
        }
    }
}

/// Where tools come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolBackend {
    /// An MCP server reached over HTTP + SSE
    #[default]
    Mcp,
    /// The in-process built-in tools
    Builtin,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub backend: ToolBackend,

    #[serde(default)]
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// SSE endpoint of the MCP server
    #[serde(default = "default_mcp_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout for a single JSON-RPC exchange
    #[serde(default = "default_rpc_timeout")]
    pub request_timeout_secs: u64,
}

fn default_mcp_url() -> String {
    "http://localhost:8931/sse".into()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_rpc_timeout() -> u64 {
    120
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            url: default_mcp_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_rpc_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskloop/config.toml).
    ///
    /// Environment overrides:
    /// - `TASKLOOP_API_KEY`, then `OPENAI_API_KEY` (when no key is configured)
    /// - `TASKLOOP_PROVIDER`, `TASKLOOP_MODEL`, `TASKLOOP_MCP_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path, |key| std::env::var(key).ok())
    }

    /// Load from `path`, applying overrides from `env`.
    pub fn load_with_env(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.api_key.is_none() {
            config.api_key = env("TASKLOOP_API_KEY").or_else(|| env("OPENAI_API_KEY"));
        }
        if let Some(provider) = env("TASKLOOP_PROVIDER") {
            config.provider = provider;
        }
        if let Some(model) = env("TASKLOOP_MODEL") {
            config.model = model;
        }
        if let Some(url) = env("TASKLOOP_MCP_URL") {
            config.tools.mcp.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "agent.history_window must be at least 1".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.conversation.max_conversations == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.max_conversations must be at least 1".into(),
            ));
        }

        if self.tools.backend == ToolBackend::Mcp && self.tools.mcp.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "tools.mcp.url is required when tools.backend = \"mcp\"".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }

    /// Render this configuration as TOML, without the API key.
    pub fn to_toml(&self) -> String {
        let redacted = Self {
            api_key: None,
            ..self.clone()
        };
        toml::to_string_pretty(&redacted).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            model: default_model(),
            api_url: None,
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: default_system_prompt(),
            agent: AgentSettings::default(),
            conversation: ConversationConfig::default(),
            tools: ToolsConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
