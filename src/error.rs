//! Error types for respbridge
//!
//! [`AppError`] covers startup, configuration and internal failures and
//! implements `IntoResponse` for Axum handlers. [`GatewayError`] is the typed
//! taxonomy that backend failures are mapped into before anything is shown to
//! a caller; its details can only be built through a sanitizing constructor.

use crate::sanitize::sanitize;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read configuration file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Backend API key environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::MissingApiKey(_)
            | Self::HttpClient(_)
            | Self::Metrics(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": sanitize(&self.to_string()),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// Kind of a [`GatewayError`], used for metrics labels and wire type names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    Network,
    Timeout,
    ServiceUnavailable,
    CircuitBreakerOpen,
    AzureOpenAI,
    Unknown,
}

impl ErrorKind {
    /// Error class name as it appears in logs and retry classification
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::Permission => "PermissionError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::RateLimit => "RateLimitError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::ServiceUnavailable => "ServiceUnavailableError",
            ErrorKind::CircuitBreakerOpen => "CircuitBreakerError",
            ErrorKind::AzureOpenAI => "AzureOpenAIError",
            ErrorKind::Unknown => "UnknownError",
        }
    }

    /// Claude Messages API `error.type` for this kind
    pub fn claude_type(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "invalid_request_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::CircuitBreakerOpen
            | ErrorKind::AzureOpenAI
            | ErrorKind::Unknown => "api_error",
            ErrorKind::ServiceUnavailable => "overloaded_error",
        }
    }

    /// OpenAI Chat Completions `(error.type, error.code)` for this kind
    pub fn openai_type_and_code(&self) -> (&'static str, &'static str) {
        match self {
            ErrorKind::Validation => ("invalid_request_error", "invalid_request"),
            ErrorKind::Authentication => ("authentication_error", "invalid_api_key"),
            ErrorKind::Permission => ("permission_error", "insufficient_permissions"),
            ErrorKind::NotFound => ("invalid_request_error", "not_found"),
            ErrorKind::RateLimit => ("rate_limit_error", "rate_limit_exceeded"),
            ErrorKind::Network => ("server_error", "network_error"),
            ErrorKind::Timeout => ("server_error", "timeout"),
            ErrorKind::ServiceUnavailable => ("server_error", "service_unavailable"),
            ErrorKind::CircuitBreakerOpen => ("server_error", "circuit_breaker_open"),
            ErrorKind::AzureOpenAI => ("server_error", "backend_error"),
            ErrorKind::Unknown => ("server_error", "internal_error"),
        }
    }

    /// Whether the kind is transient under the default policy
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::ServiceUnavailable
        )
    }
}

/// Sanitized details carried by every [`GatewayError`]
///
/// Fields are private: the only way to build one is [`ErrorDetails::new`],
/// which runs the message (and debug detail) through redaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    correlation_id: String,
    status_code: u16,
    retry_after: Option<u64>,
    message: String,
    debug_detail: Option<String>,
}

impl ErrorDetails {
    /// Build details from raw text, redacting secrets on the way in
    pub fn new(
        correlation_id: impl Into<String>,
        status_code: u16,
        retry_after: Option<u64>,
        raw_message: &str,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status_code,
            retry_after,
            message: sanitize(raw_message),
            debug_detail: None,
        }
    }

    /// Attach a debug description (sanitized before storing)
    pub fn with_debug_detail(mut self, raw_detail: &str) -> Self {
        self.debug_detail = Some(sanitize(raw_detail));
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Seconds the caller should wait before retrying, when known
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn debug_detail(&self) -> Option<&str> {
        self.debug_detail.as_deref()
    }
}

/// Typed gateway failure, one variant per [`ErrorKind`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("ValidationError: {}", .0.message)]
    Validation(ErrorDetails),
    #[error("AuthenticationError: {}", .0.message)]
    Authentication(ErrorDetails),
    #[error("PermissionError: {}", .0.message)]
    Permission(ErrorDetails),
    #[error("NotFoundError: {}", .0.message)]
    NotFound(ErrorDetails),
    #[error("RateLimitError: {}", .0.message)]
    RateLimit(ErrorDetails),
    #[error("NetworkError: {}", .0.message)]
    Network(ErrorDetails),
    #[error("TimeoutError: {}", .0.message)]
    Timeout(ErrorDetails),
    #[error("ServiceUnavailableError: {}", .0.message)]
    ServiceUnavailable(ErrorDetails),
    #[error("CircuitBreakerError: {}", .0.message)]
    CircuitBreakerOpen(ErrorDetails),
    #[error("AzureOpenAIError: {}", .0.message)]
    AzureOpenAI(ErrorDetails),
    #[error("UnknownError: {}", .0.message)]
    Unknown(ErrorDetails),
}

impl GatewayError {
    /// Wrap sanitized details in the variant for `kind`
    pub fn from_parts(kind: ErrorKind, details: ErrorDetails) -> Self {
        match kind {
            ErrorKind::Validation => Self::Validation(details),
            ErrorKind::Authentication => Self::Authentication(details),
            ErrorKind::Permission => Self::Permission(details),
            ErrorKind::NotFound => Self::NotFound(details),
            ErrorKind::RateLimit => Self::RateLimit(details),
            ErrorKind::Network => Self::Network(details),
            ErrorKind::Timeout => Self::Timeout(details),
            ErrorKind::ServiceUnavailable => Self::ServiceUnavailable(details),
            ErrorKind::CircuitBreakerOpen => Self::CircuitBreakerOpen(details),
            ErrorKind::AzureOpenAI => Self::AzureOpenAI(details),
            ErrorKind::Unknown => Self::Unknown(details),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Permission(_) => ErrorKind::Permission,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimit(_) => ErrorKind::RateLimit,
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::CircuitBreakerOpen(_) => ErrorKind::CircuitBreakerOpen,
            Self::AzureOpenAI(_) => ErrorKind::AzureOpenAI,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn details(&self) -> &ErrorDetails {
        match self {
            Self::Validation(d)
            | Self::Authentication(d)
            | Self::Permission(d)
            | Self::NotFound(d)
            | Self::RateLimit(d)
            | Self::Network(d)
            | Self::Timeout(d)
            | Self::ServiceUnavailable(d)
            | Self::CircuitBreakerOpen(d)
            | Self::AzureOpenAI(d)
            | Self::Unknown(d) => d,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.details().status_code()
    }

    pub fn retry_after(&self) -> Option<u64> {
        self.details().retry_after()
    }
}
