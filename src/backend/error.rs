//! Backend client failures

use crate::error::ErrorKind;
use crate::error_mapper::classify;
use crate::resilience::{AttemptTimeout, CircuitOpen, ClassifiableError};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Anything that can go wrong between the gateway and the Responses backend
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Non-2xx reply; `body` is the parsed JSON, or a string when not JSON
    #[error("Backend returned HTTP {status}: {}", api_message(.body))]
    Api {
        status: u16,
        body: Value,
        /// Parsed `Retry-After` header, in seconds
        retry_after: Option<u64>,
    },

    /// Connection-level failure with a normalized code such as `ECONNRESET`
    #[error("{code}: {message}")]
    Transport { code: String, message: String },

    #[error("TimeoutError: backend call timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("CircuitBreakerError: circuit {key} is open")]
    CircuitOpen { key: String, remaining: Duration },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Unrecognized backend failure: {0}")]
    Unrecognized(Value),
}

fn api_message(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        other => other
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

impl BackendError {
    /// Normalize a reqwest failure into a transport code
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let error = error.without_url();
        if error.is_decode() {
            return Self::Decode(error.to_string());
        }
        let chain = error_chain(&error).to_lowercase();
        let code = if error.is_timeout() {
            "ETIMEDOUT"
        } else if chain.contains("dns") || chain.contains("resolve") || chain.contains("lookup") {
            "ENOTFOUND"
        } else if chain.contains("refused") {
            "ECONNREFUSED"
        } else if chain.contains("reset") {
            "ECONNRESET"
        } else if chain.contains("broken pipe") {
            "EPIPE"
        } else if error.is_connect() {
            "ECONNREFUSED"
        } else if error.is_body() || error.is_request() {
            "ECONNRESET"
        } else {
            "NETWORK_ERROR"
        };
        Self::Transport {
            code: code.to_string(),
            message: chain,
        }
    }

    /// Whether this failure counts against the circuit breaker
    ///
    /// Caller mistakes (4xx other than 408/429) say nothing about backend
    /// health; rate limits are the backend working as intended.
    pub fn trips_breaker(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 408,
            Self::CircuitOpen { .. } | Self::Decode(_) | Self::Unrecognized(_) => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        classify(self).kind
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

impl ClassifiableError for BackendError {
    fn name(&self) -> &str {
        self.kind().name()
    }

    fn code(&self) -> Option<&str> {
        match self {
            Self::Transport { code, .. } => Some(code),
            Self::Timeout { .. } => Some("ETIMEDOUT"),
            _ => None,
        }
    }

    fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::Authentication
                | ErrorKind::Permission
                | ErrorKind::NotFound
        )
    }
}

impl From<AttemptTimeout> for BackendError {
    fn from(timeout: AttemptTimeout) -> Self {
        Self::Timeout {
            after: timeout.after,
        }
    }
}

impl From<CircuitOpen> for BackendError {
    fn from(open: CircuitOpen) -> Self {
        Self::CircuitOpen {
            key: open.key,
            remaining: open.remaining,
        }
    }
}
