//! Configuration loading, validation, and management for chatrelay.
//!
//! Settings come from three layers, later layers winning:
//! 1. built-in defaults
//! 2. an optional TOML file (`chatrelay.toml` unless a path is given)
//! 3. environment variables, after a `.env` file is loaded with `dotenvy`
//!
//! The resulting [`AppConfig`] is validated once at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "chatrelay.toml";

/// The root configuration structure.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Inbound webhook listener
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Hosted assistant service
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Messaging platform
    #[serde(default)]
    pub messenger: MessengerConfig,

    /// Local persistence
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Retry budget shared by every outbound HTTP call
    #[serde(default)]
    pub retry: RetryConfig,
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
            .field("webhook", &self.webhook)
            .field("assistant", &self.assistant)
            .field("messenger", &self.messenger)
            .field("database", &self.database)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    10000
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl WebhookConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How replies are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// Thread + run protocol against a configured assistant
    #[default]
    Assistant,
    /// Single chat-completion call over locally stored history
    Completion,
}

impl std::str::FromStr for ReplyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assistant" => Ok(ReplyMode::Assistant),
            "completion" => Ok(ReplyMode::Completion),
            other => Err(ConfigError::ValidationError(format!(
                "unknown assistant mode '{other}' (expected 'assistant' or 'completion')"
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_assistant_url")]
    pub base_url: String,

    /// Persona used for new assistants and for completion mode
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout
    #[serde(default = "default_assistant_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub mode: ReplyMode,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound on how long a single run is polled
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_assistant_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".into()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_assistant_timeout() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    500
}
fn default_run_timeout() -> u64 {
    120
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_assistant_url(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            timeout_secs: default_assistant_timeout(),
            mode: ReplyMode::default(),
            poll_interval_ms: default_poll_interval(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

impl std::fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .field("mode", &self.mode)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .finish()
    }
}

impl AssistantConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MessengerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_messenger_url")]
    pub base_url: String,

    #[serde(default = "default_messenger_timeout")]
    pub timeout_secs: u64,

    /// Also post replies into the chat (and mark it read)
    #[serde(default)]
    pub deliver_replies: bool,
}

fn default_messenger_url() -> String {
    "https://api.avito.ru".into()
}
fn default_messenger_timeout() -> u64 {
    10
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_messenger_url(),
            timeout_secs: default_messenger_timeout(),
            deliver_replies: false,
        }
    }
}

impl std::fmt::Debug for MessengerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessengerConfig")
            .field("token", &redact(&self.token))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("deliver_replies", &self.deliver_replies)
            .finish()
    }
}

impl MessengerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite://...` or `postgres://...`
    #[serde(default = "default_database_url")]
    pub url: String,

    /// How many stored turns are replayed as history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_database_url() -> String {
    "sqlite://chatrelay.db".into()
}
fn default_history_limit() -> usize {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            history_limit: default_history_limit(),
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Connection strings may embed a password.
        let url = match self.url.split_once('@') {
            Some((_, host)) => format!("[REDACTED]@{host}"),
            None => self.url.clone(),
        };
        f.debug_struct("DatabaseConfig")
            .field("url", &url)
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    5000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration for serving: file, then `.env` and process
    /// environment, then full validation including credentials.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::load_without_credentials(path)?;
        config.validate_credentials()?;
        Ok(config)
    }

    /// Like [`AppConfig::load`] but tolerates missing API credentials.
    ///
    /// Used by commands that only touch the local database.
    pub fn load_without_credentials(path: Option<&Path>) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(env_path) => tracing::debug!(path = %env_path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
        }

        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Overlay environment variables read through `lookup`.
    ///
    /// Empty values are ignored. The legacy `POSTGRES_URL` and
    /// `POSTGRES_LIMIT` keys are honoured when the generic ones are absent.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WEBHOOK_HOST") {
            self.webhook.host = v;
        }
        if let Some(v) = get("WEBHOOK_PORT") {
            self.webhook.port = parse_number("WEBHOOK_PORT", &v)?;
        }

        if let Some(v) = get("OPENAI_API_KEY") {
            self.assistant.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.assistant.model = v;
        }
        if let Some(v) = get("OPENAI_URL") {
            self.assistant.base_url = v;
        }
        if let Some(v) = get("OPENAI_PROMPT") {
            self.assistant.system_prompt = v;
        }
        if let Some(v) = get("OPENAI_TEMPERATURE") {
            self.assistant.temperature = parse_number("OPENAI_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("OPENAI_TIMEOUT") {
            self.assistant.timeout_secs = env_duration("OPENAI_TIMEOUT", &v, Unit::Seconds)?
                .as_secs();
        }
        if let Some(v) = get("ASSISTANT_MODE") {
            self.assistant.mode = v.parse()?;
        }
        if let Some(v) = get("RUN_POLL_INTERVAL_MS") {
            self.assistant.poll_interval_ms =
                env_duration("RUN_POLL_INTERVAL_MS", &v, Unit::Millis)?.as_millis() as u64;
        }
        if let Some(v) = get("RUN_TIMEOUT") {
            self.assistant.run_timeout_secs =
                env_duration("RUN_TIMEOUT", &v, Unit::Seconds)?.as_secs();
        }

        if let Some(v) = get("AVITO_TOKEN") {
            self.messenger.token = Some(v);
        }
        if let Some(v) = get("AVITO_API_URL") {
            self.messenger.base_url = v;
        }
        if let Some(v) = get("AVITO_TIMEOUT") {
            self.messenger.timeout_secs = env_duration("AVITO_TIMEOUT", &v, Unit::Seconds)?
                .as_secs();
        }
        if let Some(v) = get("DELIVER_REPLIES") {
            self.messenger.deliver_replies = parse_bool("DELIVER_REPLIES", &v)?;
        }

        if let Some(v) = get("DATABASE_URL").or_else(|| get("POSTGRES_URL")) {
            self.database.url = v;
        }
        if let Some(v) = get("HISTORY_LIMIT") {
            self.database.history_limit = parse_number("HISTORY_LIMIT", &v)?;
        } else if let Some(v) = get("POSTGRES_LIMIT") {
            self.database.history_limit = parse_number("POSTGRES_LIMIT", &v)?;
        }

        if let Some(v) = get("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_number("RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms =
                env_duration("RETRY_BASE_DELAY_MS", &v, Unit::Millis)?.as_millis() as u64;
        }
        if let Some(v) = get("RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms =
                env_duration("RETRY_MAX_DELAY_MS", &v, Unit::Millis)?.as_millis() as u64;
        }

        Ok(())
    }

    /// Validate value ranges. Credentials are checked separately.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.assistant.temperature) {
            return Err(ConfigError::ValidationError(
                "assistant.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        if self.assistant.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "assistant.poll_interval_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Both remote services need a credential before the relay can serve.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.assistant.api_key.is_none() {
            return Err(ConfigError::MissingCredential("OPENAI_API_KEY"));
        }
        if self.messenger.token.is_none() {
            return Err(ConfigError::MissingCredential("AVITO_TOKEN"));
        }
        Ok(())
    }

    /// Generate a TOML document with every default filled in.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

#[derive(Clone, Copy)]
enum Unit {
    Seconds,
    Millis,
}

fn env_duration(key: &str, value: &str, bare: Unit) -> Result<Duration, ConfigError> {
    let value = value.trim();
    if let Ok(n) = value.parse::<u64>() {
        return Ok(match bare {
            Unit::Seconds => Duration::from_secs(n),
            Unit::Millis => Duration::from_millis(n),
        });
    }
    parse_duration(value).map_err(|reason| ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    })
}

/// Parse `500ms`, `3s`, `2m` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("'{value}' is not a duration"))?;

    match unit {
        "" | "s" => Ok(Duration::from_secs(n)),
        "ms" => Ok(Duration::from_millis(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        other => Err(format!("unknown duration unit '{other}' in '{value}'")),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Missing required credential {0}")]
    MissingCredential(&'static str),
}
