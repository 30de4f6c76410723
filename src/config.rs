//! Configuration management for respbridge
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Every section except `[server]` and `[backend]` is optional and falls back
//! to defaults. Values are validated after parsing; the resilience sections
//! are checked by building the runtime configs they describe.

use crate::analysis::ReasoningEngine;
use crate::error::{AppError, AppResult};
use crate::resilience::{CircuitBreakerConfig, DegradationConfig, Jitter, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub degradation: DegradationSettings,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    60
}

/// How the API key is presented to the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// `api-key: <key>` header (Azure OpenAI style)
    #[default]
    ApiKey,
    /// `Authorization: Bearer <key>`
    Bearer,
}

/// Responses backend configuration
///
/// The API key itself never lives in the file; `api_key_env` names the
/// environment variable that holds it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    base_url: String,
    #[serde(default = "default_api_key_env")]
    api_key_env: String,
    #[serde(default)]
    auth_scheme: AuthScheme,
    default_model: String,
    #[serde(default)]
    fallback_model: Option<String>,
    #[serde(default = "default_health_check_interval")]
    health_check_interval_seconds: u64,
    /// Caller model name → backend model name
    #[serde(default)]
    model_map: HashMap<String, String>,
}

fn default_api_key_env() -> String {
    "RESPBRIDGE_API_KEY".to_string()
}

fn default_health_check_interval() -> u64 {
    30
}

impl BackendConfig {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key_env(&self) -> &str {
        &self.api_key_env
    }

    pub fn auth_scheme(&self) -> AuthScheme {
        self.auth_scheme
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn fallback_model(&self) -> Option<&str> {
        self.fallback_model.as_deref()
    }

    /// Zero disables background probing
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_seconds > 0)
            .then(|| Duration::from_secs(self.health_check_interval_seconds))
    }

    pub fn model_map(&self) -> &HashMap<String, String> {
        &self.model_map
    }

    /// Backend model for a caller model, `default_model` when unmapped
    pub fn map_model(&self, caller_model: &str) -> &str {
        self.model_map
            .get(caller_model)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    /// Every backend model this config can route to
    pub fn known_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.model_map.values().cloned().collect();
        models.push(self.default_model.clone());
        if let Some(fallback) = &self.fallback_model {
            models.push(fallback.clone());
        }
        models.sort();
        models.dedup();
        models
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> AppResult<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(AppError::MissingApiKey(self.api_key_env.clone())),
        }
    }
}

/// Reasoning analysis configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub engine: ReasoningEngine,
    #[serde(default = "default_max_output_tokens")]
    pub default_max_output_tokens: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: ReasoningEngine::default(),
            default_max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_output_tokens() -> u32 {
    4096
}

/// `[retry]` section, turned into a [`RetryConfig`] at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default)]
    pub jitter: Jitter,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_on_rate_limit: bool,
}

fn default_max_attempts() -> u32 {
    crate::resilience::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    crate::resilience::retry::DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    crate::resilience::retry::DEFAULT_MAX_DELAY_MS
}

fn default_backoff_multiplier() -> f64 {
    crate::resilience::retry::DEFAULT_BACKOFF_MULTIPLIER
}

fn default_jitter_factor() -> f64 {
    crate::resilience::retry::DEFAULT_JITTER_FACTOR
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: Jitter::default(),
            jitter_factor: default_jitter_factor(),
            attempt_timeout_ms: None,
            retry_on_rate_limit: false,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> Result<RetryConfig, &'static str> {
        if self.attempt_timeout_ms == Some(0) {
            return Err("attempt_timeout_ms must be greater than 0 when set");
        }
        Ok(RetryConfig::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )?
        .with_jitter(self.jitter, self.jitter_factor)?
        .with_attempt_timeout(self.attempt_timeout_ms.map(Duration::from_millis))
        .with_rate_limit_retries(self.retry_on_rate_limit))
    }
}

/// `[circuit_breaker]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: u32,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_reset_timeout_seconds")]
    pub reset_timeout_seconds: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    crate::resilience::circuit_breaker::DEFAULT_FAILURE_THRESHOLD
}

fn default_failure_rate_threshold() -> f64 {
    crate::resilience::circuit_breaker::DEFAULT_FAILURE_RATE_THRESHOLD
}

fn default_minimum_calls() -> u32 {
    crate::resilience::circuit_breaker::DEFAULT_MINIMUM_CALLS
}

fn default_window_size() -> usize {
    crate::resilience::circuit_breaker::DEFAULT_WINDOW_SIZE
}

fn default_reset_timeout_seconds() -> u64 {
    crate::resilience::circuit_breaker::DEFAULT_RESET_TIMEOUT_SECS
}

fn default_half_open_max_calls() -> u32 {
    crate::resilience::circuit_breaker::DEFAULT_HALF_OPEN_MAX_CALLS
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_rate_threshold: default_failure_rate_threshold(),
            minimum_calls: default_minimum_calls(),
            window_size: default_window_size(),
            reset_timeout_seconds: default_reset_timeout_seconds(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self) -> Result<CircuitBreakerConfig, &'static str> {
        CircuitBreakerConfig::new(
            self.failure_threshold,
            self.failure_rate_threshold,
            self.minimum_calls,
            self.window_size,
            Duration::from_secs(self.reset_timeout_seconds),
            self.half_open_max_calls,
        )
    }
}

/// `[conversation]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversationSettings {
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

fn default_max_age_seconds() -> u64 {
    3600
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_max_conversations() -> usize {
    10_000
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            max_age_seconds: default_max_age_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            max_conversations: default_max_conversations(),
        }
    }
}

/// `[degradation]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DegradationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_degrade: bool,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

fn default_cache_capacity() -> usize {
    256
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

impl Default for DegradationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_degrade: true,
            cache_capacity: default_cache_capacity(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

impl DegradationSettings {
    pub fn to_degradation_config(&self) -> DegradationConfig {
        DegradationConfig {
            enabled: self.enabled,
            auto_degrade: self.auto_degrade,
            cache_capacity: self.cache_capacity,
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
        }
    }
}

/// Deployment environment; development adds debug detail to error payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub environment: Environment,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            environment: Environment::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self = toml::from_str(&content).map_err(|source| {
            AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            }
        })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    pub fn is_development(&self) -> bool {
        self.observability.environment == Environment::Development
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`; call it explicitly when
    /// building a `Config` by hand.
    pub fn validate(&self) -> AppResult<()> {
        if self.server.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "server.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.server.request_timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "server.request_timeout_seconds cannot exceed 300 seconds (5 minutes), got {}",
                self.server.request_timeout_seconds
            )));
        }

        let backend = &self.backend;
        if !backend.base_url.starts_with("http://") && !backend.base_url.starts_with("https://") {
            return Err(AppError::Config(format!(
                "backend.base_url '{}' must start with 'http://' or 'https://'",
                backend.base_url
            )));
        }
        if backend.base_url.ends_with('/') {
            return Err(AppError::Config(format!(
                "backend.base_url '{}' must not end with '/'; '/responses' and '/models' are appended to it",
                backend.base_url
            )));
        }
        if backend.api_key_env.trim().is_empty() {
            return Err(AppError::Config(
                "backend.api_key_env must name an environment variable".to_string(),
            ));
        }
        if backend.default_model.trim().is_empty() {
            return Err(AppError::Config(
                "backend.default_model must not be empty".to_string(),
            ));
        }
        if backend
            .fallback_model
            .as_deref()
            .is_some_and(|m| m.trim().is_empty())
        {
            return Err(AppError::Config(
                "backend.fallback_model must not be empty when set".to_string(),
            ));
        }
        if let Some((caller, _)) = backend
            .model_map
            .iter()
            .find(|(_, target)| target.trim().is_empty())
        {
            return Err(AppError::Config(format!(
                "backend.model_map entry '{}' maps to an empty model name",
                caller
            )));
        }

        if self.reasoning.default_max_output_tokens == 0 {
            return Err(AppError::Config(
                "reasoning.default_max_output_tokens must be greater than 0".to_string(),
            ));
        }

        self.retry
            .to_retry_config()
            .map_err(|e| AppError::Config(format!("retry: {}", e)))?;
        self.circuit_breaker
            .to_breaker_config()
            .map_err(|e| AppError::Config(format!("circuit_breaker: {}", e)))?;

        let conversation = &self.conversation;
        if conversation.max_age_seconds == 0 {
            return Err(AppError::Config(
                "conversation.max_age_seconds must be greater than 0".to_string(),
            ));
        }
        if conversation.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "conversation.sweep_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if conversation.max_conversations == 0 {
            return Err(AppError::Config(
                "conversation.max_conversations must be greater than 0".to_string(),
            ));
        }

        if self.degradation.enabled && self.degradation.cache_ttl_seconds == 0 {
            return Err(AppError::Config(
                "degradation.cache_ttl_seconds must be greater than 0 when degradation is enabled"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
