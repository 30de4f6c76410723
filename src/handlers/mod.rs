//! HTTP request handlers for the respbridge API

use crate::backend::{HttpBackend, ModelHealth, ResponsesBackend};
use crate::config::Config;
use crate::conversation::ConversationTracker;
use crate::error::{AppError, AppResult};
use crate::error_mapper::ErrorMapper;
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::resilience::{
    CircuitBreaker, DegradationManager, RetryRegistry, Sleeper, TokioSleeper,
};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod completions;
pub mod health;
pub mod messages;
pub mod metrics;

/// Application state shared across all handlers
///
/// Every component is constructed once at startup and injected here; nothing
/// in the gateway reaches for a global. All fields are Arc'd for cheap
/// cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    backend: Arc<dyn ResponsesBackend>,
    health: Arc<ModelHealth>,
    breaker: Arc<CircuitBreaker>,
    degradation: Arc<DegradationManager>,
    conversations: Arc<ConversationTracker>,
    retries: Arc<RetryRegistry>,
    mapper: ErrorMapper,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Build state around an explicit backend and retry timer
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration section does not convert into a
    /// valid component config, or if metrics registration fails.
    pub fn new(
        config: Config,
        backend: Arc<dyn ResponsesBackend>,
        sleeper: Arc<dyn Sleeper>,
    ) -> AppResult<Self> {
        let retry_config = config
            .retry
            .to_retry_config()
            .map_err(|e| AppError::Config(format!("retry: {}", e)))?;
        let breaker_config = config
            .circuit_breaker
            .to_breaker_config()
            .map_err(|e| AppError::Config(format!("circuit_breaker: {}", e)))?;

        let conversation = &config.conversation;
        let conversations = ConversationTracker::new(
            Duration::from_secs(conversation.max_age_seconds),
            conversation.max_conversations,
        );

        let state = Self {
            health: Arc::new(ModelHealth::new(config.backend.known_models())),
            breaker: Arc::new(CircuitBreaker::new(breaker_config)),
            degradation: Arc::new(DegradationManager::new(
                config.degradation.to_degradation_config(),
            )),
            conversations: Arc::new(conversations),
            retries: Arc::new(RetryRegistry::new(retry_config, sleeper)),
            mapper: ErrorMapper::new(config.is_development()),
            metrics: Arc::new(Metrics::new()?),
            backend,
            config: Arc::new(config),
        };

        tracing::info!(
            backend = %state.config.backend.base_url(),
            default_model = %state.config.backend.default_model(),
            reasoning_enabled = state.config.reasoning.enabled,
            degradation_enabled = state.config.degradation.enabled,
            "Application state initialized"
        );

        Ok(state)
    }

    /// Build state with the HTTP backend and real timers
    ///
    /// # Errors
    ///
    /// Returns an error if the API key variable is unset or the HTTP client
    /// cannot be built, in addition to the errors of [`AppState::new`].
    pub fn from_config(config: Config) -> AppResult<Self> {
        let backend = HttpBackend::new(
            config.backend.base_url(),
            config.backend.api_key()?,
            config.backend.auth_scheme(),
            config.request_timeout(),
        )?;
        Self::new(config, Arc::new(backend), Arc::new(TokioSleeper))
    }

    /// Spawn background model probing (if configured) and the conversation sweep
    pub fn start_background_tasks(&self) {
        if let Some(interval) = self.config.backend.health_check_interval() {
            Arc::clone(&self.health).start_background_checks(Arc::clone(&self.backend), interval);
        } else {
            tracing::info!("Background backend probing disabled");
        }
        Arc::clone(&self.conversations).start_background_sweep(Duration::from_secs(
            self.config.conversation.sweep_interval_seconds,
        ));
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &dyn ResponsesBackend {
        self.backend.as_ref()
    }

    pub fn health(&self) -> &ModelHealth {
        &self.health
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn degradation(&self) -> &DegradationManager {
        &self.degradation
    }

    pub fn conversations(&self) -> &ConversationTracker {
        &self.conversations
    }

    pub fn retries(&self) -> &RetryRegistry {
        &self.retries
    }

    pub fn mapper(&self) -> &ErrorMapper {
        &self.mapper
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Full HTTP surface with request ids and request tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(messages::handler))
        .route("/v1/chat/completions", post(completions::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route("/admin/service-level/restore", post(admin::restore))
        .with_state(state)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appstate_new_wires_components() {
        let state = test_support::state();
        assert_eq!(state.config().server.port, 3000);
        assert_eq!(state.conversations().len(), 0);
        assert!(state.breaker().open_circuits().is_empty());
        assert_eq!(state.retries().defaults().max_attempts(), 3);
    }

    #[test]
    fn test_appstate_is_clonable() {
        let state = test_support::state();
        let state2 = state.clone();
        assert!(Arc::ptr_eq(&state.metrics, &state2.metrics));
    }

    #[test]
    fn test_from_config_requires_api_key() {
        use std::str::FromStr;
        let config = Config::from_str(
            &test_support::TEST_CONFIG.replace(
                "default_model",
                "api_key_env = \"RESPBRIDGE_TEST_UNSET_KEY\"\ndefault_model",
            ),
        )
        .expect("config parses");
        let err = AppState::from_config(config).err().expect("missing key");
        assert!(matches!(err, AppError::MissingApiKey(ref name) if name == "RESPBRIDGE_TEST_UNSET_KEY"));
    }
}
