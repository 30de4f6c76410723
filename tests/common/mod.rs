//! Shared helpers for gateway integration tests
//!
//! Each test file pulls in what it needs, so some helpers are unused in any
//! single test binary.
#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use respbridge::backend::{HttpBackend, ResponsesBackend};
use respbridge::config::{AuthScheme, Config};
use respbridge::handlers::{self, AppState};
use respbridge::resilience::RecordingSleeper;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;

/// Gateway config pointing at `base_url` with deterministic retry settings
pub fn config_for(base_url: &str, extra: &str) -> Config {
    let toml = format!(
        r#"
[server]
host = "127.0.0.1"
port = 3000
request_timeout_seconds = 5

[backend]
base_url = "{base_url}"
default_model = "gpt-5"
fallback_model = "gpt-5-mini"
health_check_interval_seconds = 0

[backend.model_map]
"claude-3-5-sonnet-20241022" = "gpt-5"
"gpt-4o" = "gpt-5"

[retry]
max_attempts = 3
base_delay_ms = 100
max_delay_ms = 1000
jitter = "none"

{extra}
"#
    );
    Config::from_str(&toml).expect("test config should parse")
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub sleeper: Arc<RecordingSleeper>,
}

pub fn app_with_backend(config: Config, backend: Arc<dyn ResponsesBackend>) -> TestApp {
    let sleeper = Arc::new(RecordingSleeper::new());
    let state = AppState::new(config, backend, sleeper.clone()).expect("state builds");
    TestApp {
        router: handlers::router(state.clone()),
        state,
        sleeper,
    }
}

/// App talking HTTP to a wiremock backend
pub fn app_for(server: &MockServer, extra: &str) -> TestApp {
    let backend = HttpBackend::new(
        server.uri(),
        "sk-test-key-1234567890abcdef",
        AuthScheme::ApiKey,
        Duration::from_secs(5),
    )
    .expect("client builds");
    app_with_backend(config_for(&server.uri(), extra), Arc::new(backend))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|e| panic!("body is not JSON ({}): {}", e, self.body))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn post(router: &Router, path: &str, body: &str, headers: &[(&str, &str)]) -> TestResponse {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    send(router, request).await
}

pub async fn get(router: &Router, path: &str) -> TestResponse {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

/// Minimal successful backend response
pub fn backend_response(id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "object": "response",
        "created": 1_700_000_000,
        "model": "gpt-5",
        "output": [{"type": "text", "text": text}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
    })
}

/// JSON bodies of every request the mock backend received
pub async fn backend_requests(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).expect("gateway sends JSON"))
        .collect()
}

pub fn claude_hello() -> String {
    json!({
        "model": "claude-3-5-sonnet-20241022",
        "messages": [{"role": "user", "content": "Hello"}],
        "max_tokens": 50
    })
    .to_string()
}
