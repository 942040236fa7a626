//! Configuration loading, validation, and management for Threadline.
//!
//! Loads configuration from `~/.threadline/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.threadline/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature for the chat node
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Optional system prompt prepended to every chat request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Agent graph settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Checkpoint store configuration
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Chat session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
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
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("agent", &self.agent)
            .field("checkpoint", &self.checkpoint)
            .field("session", &self.session)
            .field("tools", &self.tools)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Per-provider overrides (`[providers.<name>]`).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model used when this is the default provider, over the top-level one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum chat → tools round trips per turn
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    /// Upper bound on a single tool call, in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_tool_iterations() -> usize {
    25
}
fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_checkpoint_backend")]
    pub backend: String,

    /// SQLite database file. Relative paths resolve against the config dir.
    #[serde(default = "default_checkpoint_path")]
    pub path: String,
}

fn default_checkpoint_backend() -> String {
    "sqlite".into()
}
fn default_checkpoint_path() -> String {
    "chatbot.db".into()
}

impl CheckpointConfig {
    /// Absolute database path.
    pub fn resolved_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            AppConfig::config_dir().join(path)
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: default_checkpoint_backend(),
            path: default_checkpoint_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Words kept when deriving a thread title from the first message
    #[serde(default = "default_title_max_words")]
    pub title_max_words: usize,

    /// Start new sessions in temporary mode
    #[serde(default)]
    pub start_temporary: bool,
}

fn default_title_max_words() -> usize {
    6
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            title_max_words: default_title_max_words(),
            start_temporary: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub web_search: WebSearchConfig,

    #[serde(default)]
    pub stock_price: StockPriceConfig,

    #[serde(default)]
    pub calculator: CalculatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_search_region")]
    pub region: String,

    #[serde(default = "default_search_url")]
    pub base_url: String,

    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_search_region() -> String {
    "us-en".into()
}
fn default_search_url() -> String {
    "https://api.duckduckgo.com".into()
}
fn default_search_timeout_secs() -> u64 {
    15
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region: default_search_region(),
            base_url: default_search_url(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StockPriceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_stock_url")]
    pub base_url: String,

    #[serde(default = "default_stock_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_stock_url() -> String {
    "https://www.alphavantage.co".into()
}
fn default_stock_timeout_secs() -> u64 {
    10
}

impl std::fmt::Debug for StockPriceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockPriceConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for StockPriceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: default_stock_url(),
            timeout_secs: default_stock_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_calculator_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_expression_len")]
    pub max_expression_len: usize,
}

fn default_calculator_timeout_ms() -> u64 {
    1000
}
fn default_max_expression_len() -> usize {
    512
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_calculator_timeout_ms(),
            max_expression_len: default_max_expression_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8501
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.threadline/config.toml).
    ///
    /// Environment variables override the file:
    /// - `THREADLINE_API_KEY`, then `OPENAI_API_KEY` (when no key is configured)
    /// - `THREADLINE_PROVIDER`, `THREADLINE_MODEL`, `THREADLINE_DB_PATH`
    /// - `ALPHAVANTAGE_API_KEY` (when no stock key is configured)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("THREADLINE_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("THREADLINE_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("THREADLINE_MODEL") {
            self.default_model = model;
            if let Some(provider) = self.providers.get_mut(&self.default_provider) {
                provider.default_model = None;
            }
        }

        if let Some(path) = lookup("THREADLINE_DB_PATH") {
            self.checkpoint.path = path;
        }

        if self.tools.stock_price.api_key.is_none() {
            self.tools.stock_price.api_key = lookup("ALPHAVANTAGE_API_KEY");
        }
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
        dirs_home().join(".threadline")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.checkpoint.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "checkpoint.backend must be \"sqlite\" or \"memory\", got \"{}\"",
                self.checkpoint.backend
            )));
        }

        if self.session.title_max_words == 0 {
            return Err(ConfigError::ValidationError(
                "session.title_max_words must be at least 1".into(),
            ));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// Model the chat agent runs: the default provider's own `default_model`
    /// when set, otherwise the top-level one.
    pub fn active_model(&self) -> &str {
        self.providers
            .get(&self.default_provider)
            .and_then(|p| p.default_model.as_deref())
            .unwrap_or(&self.default_model)
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            system_prompt: None,
            agent: AgentSettings::default(),
            checkpoint: CheckpointConfig::default(),
            session: SessionConfig::default(),
            tools: ToolsConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
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
