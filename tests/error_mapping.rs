//! Backend failures as callers see them: status codes, payload shapes,
//! retry behavior and redaction

mod common;

use axum::http::StatusCode;
use common::{app_for, backend_requests, claude_hello, post};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_hello() -> String {
    json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "Hello"}],
        "max_completion_tokens": 50
    })
    .to_string()
}

#[tokio::test]
async fn test_rate_limit_maps_to_429_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"type": "rate_limit_error", "message": "Too many requests", "retry_after": 60}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let app = app_for(&server, "");

    let response = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;

    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.header("retry-after"), Some("60"));
    let body = response.json();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["message"], "Too many requests");
    assert!(
        app.sleeper.delays().is_empty(),
        "rate limits are not retried by default"
    );
}

#[tokio::test]
async fn test_rate_limit_in_openai_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"type": "rate_limit_error", "message": "Too many requests"}
        })))
        .mount(&server)
        .await;
    let app = app_for(&server, "");

    let response = post(&app.router, "/v1/chat/completions", &openai_hello(), &[]).await;

    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.header("retry-after"), Some("60"));
    let body = response.json();
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"type": "authentication_error", "message": "invalid credentials"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let app = app_for(&server, "");

    let response = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["error"]["type"], "authentication_error");
    assert!(app.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_unavailable_backend_is_retried_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .expect(3)
        .mount(&server)
        .await;
    let app = app_for(&server, "");

    let response = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json()["error"]["type"], "overloaded_error");
    assert_eq!(
        app.sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::backend_response("resp_ok", "fine")),
        )
        .mount(&server)
        .await;
    let app = app_for(&server, "");

    let response = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["content"][0]["text"], "fine");
    assert_eq!(app.sleeper.delays(), vec![Duration::from_millis(100)]);
    assert_eq!(backend_requests(&server).await.len(), 2);
}

#[tokio::test]
async fn test_malformed_json_is_rejected_before_the_backend() {
    let server = MockServer::start().await;
    let app = app_for(&server, "");

    let response = post(&app.router, "/v1/messages", "{not json", &[]).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let body = response.json();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(backend_requests(&server).await.is_empty());
}

#[tokio::test]
async fn test_missing_max_tokens_is_rejected_for_claude() {
    let server = MockServer::start().await;
    let app = app_for(&server, "");

    let body = json!({
        "model": "claude-3-5-sonnet-20241022",
        "messages": [{"role": "user", "content": "Hello"}],
        "max_tokens": 0
    });
    let response = post(&app.router, "/v1/messages", &body.to_string(), &[]).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(
        response.json()["error"]["message"]
            .as_str()
            .unwrap()
            .contains("max_tokens")
    );
}

#[tokio::test]
async fn test_secrets_in_backend_errors_are_redacted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "type": "invalid_request_error",
                "message": "key sk-live0123456789abcdef rejected for ops@example.com"
            }
        })))
        .mount(&server)
        .await;
    let app = app_for(&server, "");

    let response = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let message = response.json()["error"]["message"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(!message.contains("sk-live0123456789abcdef"), "{}", message);
    assert!(!message.contains("ops@example.com"), "{}", message);
    assert!(message.contains("[REDACTED]"));
    assert!(message.contains("[EMAIL_REDACTED]"));
}

#[tokio::test]
async fn test_unknown_failure_is_500_without_debug_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(418).set_body_json(json!({
            "error": {"type": "teapot_error", "message": "boom"}
        })))
        .mount(&server)
        .await;
    let app = app_for(&server, "");

    let response = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json();
    assert_eq!(body["error"]["type"], "api_error");
    assert!(body["error"].get("debug").is_none());
}
