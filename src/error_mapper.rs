//! Backend failure → caller-format error mapping
//!
//! Backend error types map onto the gateway taxonomy as follows:
//!
//! | backend `type`          | kind               | status | default retry-after |
//! |-------------------------|--------------------|--------|---------------------|
//! | `invalid_request_error` | Validation         | 400    |                     |
//! | `not_found_error`       | NotFound           | 400    |                     |
//! | `authentication_error`  | Authentication     | 401    |                     |
//! | `permission_error`      | Permission         | 401    |                     |
//! | `rate_limit_error`      | RateLimit          | 429    | 60s                 |
//! | `api_error`             | ServiceUnavailable | 503    | 60s                 |
//! | `overloaded_error`      | ServiceUnavailable | 503    | 300s                |
//! | anything else           | Unknown            | 500    |                     |
//!
//! Every message is redacted by [`ErrorDetails::new`] before it can reach a
//! client payload or a log line.

use crate::backend::BackendError;
use crate::error::{ErrorDetails, ErrorKind, GatewayError};
use crate::formats::RequestFormat;
use crate::formats::responses::BackendErrorBody;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Taxonomy placement of a backend failure, before sanitization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub status: u16,
    pub retry_after: Option<u64>,
    pub message: String,
}

fn mapping_for_type(backend_type: &str) -> Option<(ErrorKind, u16, Option<u64>)> {
    let mapping = match backend_type {
        "invalid_request_error" => (ErrorKind::Validation, 400, None),
        "not_found_error" => (ErrorKind::NotFound, 400, None),
        "authentication_error" => (ErrorKind::Authentication, 401, None),
        "permission_error" => (ErrorKind::Permission, 401, None),
        "rate_limit_error" => (ErrorKind::RateLimit, 429, Some(60)),
        "api_error" => (ErrorKind::ServiceUnavailable, 503, Some(60)),
        "overloaded_error" => (ErrorKind::ServiceUnavailable, 503, Some(300)),
        _ => return None,
    };
    Some(mapping)
}

fn type_for_status(status: u16) -> Option<&'static str> {
    match status {
        400 | 422 => Some("invalid_request_error"),
        401 => Some("authentication_error"),
        403 => Some("permission_error"),
        404 => Some("not_found_error"),
        429 => Some("rate_limit_error"),
        529 => Some("overloaded_error"),
        500..=599 => Some("api_error"),
        _ => None,
    }
}

/// Parse `retry_after` given as a number or numeric string, in seconds
fn retry_after_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64),
        _ => None,
    }
}

fn classify_api(status: u16, body: &Value, header_retry_after: Option<u64>) -> Classification {
    let parsed = serde_json::from_value::<BackendErrorBody>(body.clone())
        .ok()
        .map(|b| b.error);

    let message = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .or_else(|| body.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("Backend returned HTTP {}", status));

    let payload_retry_after = parsed
        .as_ref()
        .and_then(|e| e.retry_after.as_ref())
        .and_then(retry_after_value);

    if status == 408 && parsed.as_ref().and_then(|e| e.kind.as_deref()).is_none() {
        return Classification {
            kind: ErrorKind::Timeout,
            status: 408,
            retry_after: payload_retry_after.or(header_retry_after),
            message,
        };
    }

    let mapping = parsed
        .as_ref()
        .and_then(|e| e.kind.as_deref())
        .and_then(mapping_for_type)
        .or_else(|| type_for_status(status).and_then(mapping_for_type));

    match mapping {
        Some((kind, mapped_status, default_retry_after)) => Classification {
            kind,
            status: mapped_status,
            retry_after: payload_retry_after
                .or(header_retry_after)
                .or(default_retry_after),
            message,
        },
        None => Classification {
            kind: ErrorKind::Unknown,
            status: 500,
            retry_after: payload_retry_after.or(header_retry_after),
            message,
        },
    }
}

fn classify_transport(code: &str, message: &str) -> Classification {
    let (kind, status) = match code {
        "ETIMEDOUT" | "ESOCKETTIMEDOUT" | "ECONNABORTED" | "TIMEOUT_ERROR" => {
            (ErrorKind::Timeout, 408)
        }
        "ENOMEM" => (ErrorKind::ServiceUnavailable, 503),
        _ => (ErrorKind::Network, 503),
    };
    Classification {
        kind,
        status,
        retry_after: None,
        message: format!("{}: {}", code, message),
    }
}

/// Place a backend failure in the taxonomy
pub fn classify(error: &BackendError) -> Classification {
    match error {
        BackendError::Api {
            status,
            body,
            retry_after,
        } => classify_api(*status, body, *retry_after),
        BackendError::Transport { code, message } => classify_transport(code, message),
        BackendError::Timeout { after } => Classification {
            kind: ErrorKind::Timeout,
            status: 408,
            retry_after: None,
            message: format!("Backend call timed out after {}ms", after.as_millis()),
        },
        BackendError::CircuitOpen { remaining, .. } => Classification {
            kind: ErrorKind::CircuitBreakerOpen,
            status: 503,
            retry_after: Some(remaining.as_secs_f64().ceil().max(1.0) as u64),
            message: "Service temporarily unavailable: circuit breaker is open".to_string(),
        },
        BackendError::Decode(_) => Classification {
            kind: ErrorKind::AzureOpenAI,
            status: 500,
            retry_after: None,
            message: "Invalid response from backend".to_string(),
        },
        BackendError::Unrecognized(value) => Classification {
            kind: ErrorKind::AzureOpenAI,
            status: 500,
            retry_after: None,
            message: if value.is_object() {
                UNEXPECTED_ERROR_MESSAGE
            } else {
                UNKNOWN_ERROR_MESSAGE
            }
            .to_string(),
        },
    }
}

/// Where an error happened
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub correlation_id: &'a str,
    pub operation: &'a str,
    pub format: RequestFormat,
}

/// A mapped error together with the body to send
#[derive(Debug, Clone)]
pub struct MappedError {
    pub error: GatewayError,
    pub client_response: Value,
}

impl IntoResponse for MappedError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.client_response)).into_response();
        if let Some(seconds) = self.error.retry_after()
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorMapper {
    include_debug: bool,
}

impl ErrorMapper {
    /// `include_debug` adds sanitized debug detail to payloads (development only)
    pub fn new(include_debug: bool) -> Self {
        Self { include_debug }
    }

    pub fn map(&self, ctx: ErrorContext<'_>, error: &BackendError) -> MappedError {
        let classification = classify(error);
        let mut details = ErrorDetails::new(
            ctx.correlation_id,
            classification.status,
            classification.retry_after,
            &classification.message,
        );
        if self.include_debug {
            details = details.with_debug_detail(&format!("{}: {:?}", ctx.operation, error));
        }
        let gateway_error = GatewayError::from_parts(classification.kind, details);

        tracing::warn!(
            correlation_id = %ctx.correlation_id,
            operation = %ctx.operation,
            format = %ctx.format,
            error_kind = gateway_error.kind().name(),
            status_code = gateway_error.status_code(),
            retry_after = ?gateway_error.retry_after(),
            error = %gateway_error,
            "Backend failure mapped to client error"
        );

        self.finish(ctx.format, gateway_error)
    }

    /// Caller input rejected before any backend call
    pub fn validation(&self, ctx: ErrorContext<'_>, message: &str) -> MappedError {
        let details = ErrorDetails::new(ctx.correlation_id, 400, None, message);
        tracing::info!(
            correlation_id = %ctx.correlation_id,
            operation = %ctx.operation,
            format = %ctx.format,
            error = %details.message(),
            "Rejected invalid request"
        );
        self.finish(ctx.format, GatewayError::Validation(details))
    }

    fn finish(&self, format: RequestFormat, error: GatewayError) -> MappedError {
        let client_response = self.render(format, &error);
        MappedError {
            error,
            client_response,
        }
    }

    /// Caller-format error body for an already sanitized error
    pub fn render(&self, format: RequestFormat, error: &GatewayError) -> Value {
        let details = error.details();
        let debug = self
            .include_debug
            .then(|| details.debug_detail())
            .flatten();
        let kind = error.kind();

        let mut body = match format {
            RequestFormat::Claude => json!({
                "type": "error",
                "error": {
                    "type": kind.claude_type(),
                    "message": details.message(),
                }
            }),
            RequestFormat::OpenAi => {
                let (error_type, code) = kind.openai_type_and_code();
                json!({
                    "error": {
                        "message": details.message(),
                        "type": error_type,
                        "code": code,
                    }
                })
            }
        };
        if let Some(debug) = debug
            && let Some(object) = body.get_mut("error").and_then(Value::as_object_mut)
        {
            object.insert("debug".to_string(), Value::String(debug.to_string()));
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn ctx(format: RequestFormat) -> ErrorContext<'static> {
        ErrorContext {
            correlation_id: "req-1",
            operation: "responses.create",
            format,
        }
    }

    fn api(status: u16, body: Value) -> BackendError {
        BackendError::Api {
            status,
            body,
            retry_after: None,
        }
    }

    #[test]
    fn test_mapping_table_status_codes() {
        let table = [
            ("invalid_request_error", 400, ErrorKind::Validation, None),
            ("not_found_error", 400, ErrorKind::NotFound, None),
            ("authentication_error", 401, ErrorKind::Authentication, None),
            ("permission_error", 401, ErrorKind::Permission, None),
            ("rate_limit_error", 429, ErrorKind::RateLimit, Some(60)),
            ("api_error", 503, ErrorKind::ServiceUnavailable, Some(60)),
            ("overloaded_error", 503, ErrorKind::ServiceUnavailable, Some(300)),
            ("something_new", 500, ErrorKind::Unknown, None),
        ];
        let mapper = ErrorMapper::default();
        for (backend_type, status, kind, retry_after) in table {
            // 418 carries no status-derived type, so only the payload type decides
            let error = api(418, json!({"error": {"type": backend_type, "message": "m"}}));
            let mapped = mapper.map(ctx(RequestFormat::Claude), &error);
            assert_eq!(mapped.error.status_code(), status, "{}", backend_type);
            assert_eq!(mapped.error.kind(), kind, "{}", backend_type);
            assert_eq!(mapped.error.retry_after(), retry_after, "{}", backend_type);
        }
    }

    #[test]
    fn test_rate_limit_scenario_claude() {
        let error = api(
            429,
            json!({"error": {"type": "rate_limit_error", "message": "Rate limit exceeded", "retry_after": 60}}),
        );
        let mapped = ErrorMapper::default().map(ctx(RequestFormat::Claude), &error);
        assert!(matches!(mapped.error, GatewayError::RateLimit(_)));
        assert_eq!(mapped.error.status_code(), 429);
        assert_eq!(mapped.error.retry_after(), Some(60));
        assert_eq!(
            mapped.client_response,
            json!({"type": "error", "error": {"type": "rate_limit_error", "message": "Rate limit exceeded"}})
        );
    }

    #[test]
    fn test_rate_limit_openai_shape() {
        let error = api(429, json!({"error": {"type": "rate_limit_error", "message": "slow"}}));
        let mapped = ErrorMapper::default().map(ctx(RequestFormat::OpenAi), &error);
        assert_eq!(
            mapped.client_response,
            json!({"error": {"message": "slow", "type": "rate_limit_error", "code": "rate_limit_exceeded"}})
        );
    }

    #[test]
    fn test_retry_after_sources() {
        let from_payload = api(503, json!({"error": {"type": "overloaded_error", "retry_after": "12"}}));
        assert_eq!(classify(&from_payload).retry_after, Some(12));

        let from_header = BackendError::Api {
            status: 429,
            body: json!({"error": {"type": "rate_limit_error"}}),
            retry_after: Some(7),
        };
        assert_eq!(classify(&from_header).retry_after, Some(7));
    }

    #[test]
    fn test_type_derived_from_status() {
        assert_eq!(classify(&api(401, json!({}))).kind, ErrorKind::Authentication);
        assert_eq!(classify(&api(502, json!("Bad Gateway"))).kind, ErrorKind::ServiceUnavailable);
        assert_eq!(classify(&api(529, json!({}))).retry_after, Some(300));
        assert_eq!(classify(&api(408, json!({}))).kind, ErrorKind::Timeout);
        assert_eq!(classify(&api(302, json!({}))).kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_transport_codes() {
        let transport = |code: &str| BackendError::Transport {
            code: code.to_string(),
            message: "x".to_string(),
        };
        assert_eq!(classify(&transport("ECONNRESET")).kind, ErrorKind::Network);
        assert_eq!(classify(&transport("ECONNRESET")).status, 503);
        assert_eq!(classify(&transport("ETIMEDOUT")).kind, ErrorKind::Timeout);
        assert_eq!(classify(&transport("ETIMEDOUT")).status, 408);
        assert_eq!(classify(&transport("ENOMEM")).kind, ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn test_circuit_open_reports_remaining_cooldown() {
        let error = BackendError::CircuitOpen {
            key: "responses:gpt-5".to_string(),
            remaining: Duration::from_millis(12_300),
        };
        let classification = classify(&error);
        assert_eq!(classification.kind, ErrorKind::CircuitBreakerOpen);
        assert_eq!(classification.status, 503);
        assert_eq!(classification.retry_after, Some(13));
    }

    #[test]
    fn test_unrecognized_errors() {
        let non_object = ErrorMapper::default().map(
            ctx(RequestFormat::Claude),
            &BackendError::Unrecognized(json!(42)),
        );
        assert!(matches!(non_object.error, GatewayError::AzureOpenAI(_)));
        assert_eq!(non_object.error.status_code(), 500);
        assert_eq!(non_object.error.details().message(), UNKNOWN_ERROR_MESSAGE);

        let object = classify(&BackendError::Unrecognized(json!({"weird": true})));
        assert_eq!(object.message, UNEXPECTED_ERROR_MESSAGE);
    }

    #[test]
    fn test_debug_detail_only_when_enabled() {
        let error = api(500, json!({"error": {"type": "api_error", "message": "boom"}}));
        let prod = ErrorMapper::new(false).map(ctx(RequestFormat::OpenAi), &error);
        assert!(prod.client_response["error"].get("debug").is_none());

        let dev = ErrorMapper::new(true).map(ctx(RequestFormat::OpenAi), &error);
        let debug = dev.client_response["error"]["debug"]
            .as_str()
            .expect("debug detail present");
        assert!(debug.starts_with("responses.create"));
    }

    #[test]
    fn test_validation_error_shape() {
        let mapped = ErrorMapper::default().validation(ctx(RequestFormat::Claude), "messages must not be empty");
        assert_eq!(mapped.error.status_code(), 400);
        assert_eq!(mapped.client_response["error"]["type"], "invalid_request_error");
    }

    #[test]
    fn test_into_response_sets_retry_after() {
        let error = api(429, json!({"error": {"type": "rate_limit_error"}}));
        let response = ErrorMapper::default()
            .map(ctx(RequestFormat::Claude), &error)
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("60")
        );
    }

    proptest! {
        #[test]
        fn prop_client_response_never_leaks_keys(
            key in "sk-[A-Za-z0-9]{16,32}",
            prefix in "[a-z ]{0,20}",
            debug in any::<bool>(),
            openai in any::<bool>(),
        ) {
            let message = format!("{}invalid key {} provided", prefix, key);
            let error = api(401, json!({"error": {"type": "authentication_error", "message": message}}));
            let format = if openai { RequestFormat::OpenAi } else { RequestFormat::Claude };
            let mapped = ErrorMapper::new(debug).map(ctx(format), &error);
            let rendered = mapped.client_response.to_string();
            prop_assert!(!rendered.contains(&key));
            prop_assert_eq!(mapped.error.status_code(), 401);
        }
    }
}
