//! Configuration file
//!
//! A single JSON document with one section per subsystem. Every field has
//! a default, so `{}` is a valid file. Secrets can come from the
//! environment instead of the file:
//!
//! - `COACHLINK_JWT_SECRET` overrides `auth.jwt_secret`
//! - `OPENAI_API_KEY` overrides `openai.api_key`
//! - `STRIPE_WEBHOOK_SECRET` overrides `payments.stripe_webhook_secret`

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::auth::JwtConfig;
use crate::functions::model::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL};
use crate::functions::payments::DEFAULT_SIGNATURE_TOLERANCE_SECS;
use crate::functions::{AssistantConfig, OpenAiConfig, PaymentsConfig};
use crate::http_server::HttpServerConfig;
use crate::realtime::{RealtimeOptions, WebSocketConfig};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpServerConfig,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub assistant: AssistantSection,

    #[serde(default)]
    pub payments: PaymentsSection,

    #[serde(default)]
    pub realtime: RealtimeSection,

    #[serde(default)]
    pub openai: OpenAiSection,
}

/// Access-token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// HS256 secret shared with the backend (required for serve and token)
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_audience")]
    pub audience: String,

    /// Lifetime of tokens issued by `coachlink token`
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: i64,
}

fn default_audience() -> String {
    "authenticated".to_string()
}
fn default_token_ttl_secs() -> i64 {
    3600
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            audience: default_audience(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

/// Assistant limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSection {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_free_daily_limit")]
    pub free_daily_limit: u32,

    #[serde(default = "default_premium_daily_limit")]
    pub premium_daily_limit: u32,

    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Replaces the built-in coaching prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_requests_per_minute() -> u32 {
    10
}
fn default_free_daily_limit() -> u32 {
    20
}
fn default_premium_daily_limit() -> u32 {
    200
}
fn default_max_message_chars() -> usize {
    4000
}
fn default_max_history() -> usize {
    20
}

impl Default for AssistantSection {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            free_daily_limit: default_free_daily_limit(),
            premium_daily_limit: default_premium_daily_limit(),
            max_message_chars: default_max_message_chars(),
            max_history: default_max_history(),
            system_prompt: None,
        }
    }
}

/// Payment webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsSection {
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: i64,
}

fn default_signature_tolerance_secs() -> i64 {
    DEFAULT_SIGNATURE_TOLERANCE_SECS
}

impl Default for PaymentsSection {
    fn default() -> Self {
        Self {
            stripe_webhook_secret: None,
            signature_tolerance_secs: default_signature_tolerance_secs(),
        }
    }
}

/// Realtime client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSection {
    /// Realtime base URL, e.g. `wss://<project>.example.co/realtime/v1`
    #[serde(default)]
    pub url: String,

    /// Project API key
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_channel_hint")]
    pub channel_hint: String,

    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_safety_timeout_ms")]
    pub safety_timeout_ms: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_channel_hint() -> String {
    "coachlink".to_string()
}
fn default_schema() -> String {
    "public".to_string()
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    8000
}
fn default_safety_timeout_ms() -> u64 {
    20_000
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_join_timeout_secs() -> u64 {
    10
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            enabled: default_true(),
            channel_hint: default_channel_hint(),
            schema: default_schema(),
            debounce_ms: default_debounce_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            safety_timeout_ms: default_safety_timeout_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

/// OpenAI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSection {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for OpenAiSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from file, apply environment overrides, validate
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Override secrets from the environment
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(secret) = non_empty("COACHLINK_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.openai.api_key = key;
        }
        if let Some(secret) = non_empty("STRIPE_WEBHOOK_SECRET") {
            self.payments.stripe_webhook_secret = Some(secret);
        }
    }

    /// Validate values that would misbehave at runtime
    pub fn validate(&self) -> CliResult<()> {
        if self.assistant.requests_per_minute == 0 {
            return Err(CliError::config_error(
                "assistant.requests_per_minute must be > 0",
            ));
        }

        if self.assistant.max_message_chars == 0 {
            return Err(CliError::config_error("assistant.max_message_chars must be > 0"));
        }

        if self.assistant.premium_daily_limit < self.assistant.free_daily_limit {
            return Err(CliError::config_error(
                "assistant.premium_daily_limit must be >= free_daily_limit",
            ));
        }

        if self.auth.token_ttl_secs <= 0 {
            return Err(CliError::config_error("auth.token_ttl_secs must be > 0"));
        }

        if self.payments.signature_tolerance_secs <= 0 {
            return Err(CliError::config_error(
                "payments.signature_tolerance_secs must be > 0",
            ));
        }

        if self.realtime.retry_delay_ms == 0 {
            return Err(CliError::config_error("realtime.retry_delay_ms must be > 0"));
        }

        if self.realtime.heartbeat_secs == 0 || self.realtime.join_timeout_secs == 0 {
            return Err(CliError::config_error(
                "realtime.heartbeat_secs and join_timeout_secs must be > 0",
            ));
        }

        Ok(())
    }

    /// JWT settings; the secret is required
    pub fn jwt_config(&self) -> CliResult<JwtConfig> {
        if self.auth.jwt_secret.is_empty() {
            return Err(CliError::config_error(
                "auth.jwt_secret is required (or set COACHLINK_JWT_SECRET)",
            ));
        }

        Ok(JwtConfig {
            secret: self.auth.jwt_secret.clone(),
            audience: self.auth.audience.clone(),
            access_token_ttl: chrono::Duration::seconds(self.auth.token_ttl_secs),
        })
    }

    pub fn assistant_config(&self) -> AssistantConfig {
        let defaults = AssistantConfig::default();
        AssistantConfig {
            system_prompt: self
                .assistant
                .system_prompt
                .clone()
                .unwrap_or(defaults.system_prompt),
            max_message_chars: self.assistant.max_message_chars,
            requests_per_minute: self.assistant.requests_per_minute,
            free_daily_limit: self.assistant.free_daily_limit,
            premium_daily_limit: self.assistant.premium_daily_limit,
            max_history: self.assistant.max_history,
        }
    }

    pub fn payments_config(&self) -> PaymentsConfig {
        PaymentsConfig {
            stripe_webhook_secret: self.payments.stripe_webhook_secret.clone(),
            signature_tolerance_secs: self.payments.signature_tolerance_secs,
        }
    }

    /// OpenAI settings; the API key is required
    pub fn openai_config(&self) -> CliResult<OpenAiConfig> {
        if self.openai.api_key.is_empty() {
            return Err(CliError::config_error(
                "openai.api_key is required (or set OPENAI_API_KEY)",
            ));
        }

        Ok(OpenAiConfig {
            api_key: self.openai.api_key.clone(),
            base_url: self.openai.base_url.clone(),
            model: self.openai.model.clone(),
            max_tokens: self.openai.max_tokens,
            temperature: self.openai.temperature,
            timeout: Duration::from_secs(self.openai.timeout_secs),
        })
    }

    pub fn realtime_options(&self) -> RealtimeOptions {
        RealtimeOptions {
            enabled: self.realtime.enabled,
            channel_hint: self.realtime.channel_hint.clone(),
            debounce: Duration::from_millis(self.realtime.debounce_ms),
            max_retries: self.realtime.max_retries,
            retry_delay: Duration::from_millis(self.realtime.retry_delay_ms),
            safety_timeout: Duration::from_millis(self.realtime.safety_timeout_ms),
        }
    }

    /// WebSocket settings; url and api key are required
    pub fn websocket_config(&self, access_token: Option<String>) -> CliResult<WebSocketConfig> {
        if self.realtime.url.is_empty() || self.realtime.api_key.is_empty() {
            return Err(CliError::config_error(
                "realtime.url and realtime.api_key are required",
            ));
        }

        Ok(WebSocketConfig {
            url: self.realtime.url.clone(),
            api_key: self.realtime.api_key.clone(),
            access_token,
            heartbeat_interval: Duration::from_secs(self.realtime.heartbeat_secs),
            join_timeout: Duration::from_secs(self.realtime.join_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.http.port, 54321);
        assert_eq!(config.assistant.free_daily_limit, 20);
        assert_eq!(config.realtime.debounce_ms, 500);
        assert_eq!(config.realtime.retry_delay_ms, 8000);
        assert_eq!(config.openai.model, DEFAULT_CHAT_MODEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: Config =
            serde_json::from_str(r#"{"auth": {"jwt_secret": "from-file"}}"#).unwrap();

        config.apply_env(|name| match name {
            "COACHLINK_JWT_SECRET" => Some("from-env".to_string()),
            "OPENAI_API_KEY" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.auth.jwt_secret, "from-env");
        assert!(config.openai.api_key.is_empty());
        assert_eq!(config.payments.stripe_webhook_secret, None);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.assistant.free_daily_limit = 50;
        config.assistant.premium_daily_limit = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.realtime.retry_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_required_secrets() {
        let config = Config::default();
        assert!(config.jwt_config().is_err());
        assert!(config.openai_config().is_err());
        assert!(config.websocket_config(None).is_err());
    }

    #[test]
    fn test_realtime_options_mapping() {
        let config: Config = serde_json::from_str(
            r#"{"realtime": {"channel_hint": "students", "debounce_ms": 250, "max_retries": 5}}"#,
        )
        .unwrap();

        let options = config.realtime_options();
        assert_eq!(options.channel_hint, "students");
        assert_eq!(options.debounce, Duration::from_millis(250));
        assert_eq!(options.max_retries, 5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"http": {{"port": 9000}}, "auth": {{"jwt_secret": "s"}}}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.http.port, 9000);
        assert!(config.jwt_config().is_ok());
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert_eq!(err.code_str(), "COACHLINK_CLI_CONFIG_ERROR");
    }
}
