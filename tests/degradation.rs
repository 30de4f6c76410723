//! Circuit breaking and graceful degradation against a scripted backend

mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{app_with_backend, claude_hello, get, post};
use respbridge::backend::{BackendError, ChunkStream, ResponsesBackend};
use respbridge::config::Config;
use respbridge::formats::responses::{CanonicalRequest, ResponsesResponse};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Backend that answers until `fail` is called, then returns 503 for every call
#[derive(Default)]
struct Switchable {
    unhealthy: AtomicBool,
    calls: AtomicUsize,
}

impl Switchable {
    fn fail(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outage() -> BackendError {
        BackendError::Api {
            status: 503,
            body: json!({"error": {"type": "api_error", "message": "upstream down"}}),
            retry_after: None,
        }
    }
}

#[async_trait]
impl ResponsesBackend for Switchable {
    async fn create(&self, request: &CanonicalRequest) -> Result<ResponsesResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        Ok(serde_json::from_value(json!({
            "id": format!("resp_{}", self.calls()),
            "model": request.model,
            "output": [{"type": "text", "text": "live answer"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        }))
        .expect("valid response"))
    }

    async fn create_stream(&self, _: &CanonicalRequest) -> Result<ChunkStream, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Self::outage())
    }
}

/// Backend that answers every call, but only after `delay`
struct Slow {
    delay: Duration,
    calls: AtomicUsize,
}

impl Slow {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponsesBackend for Slow {
    async fn create(&self, request: &CanonicalRequest) -> Result<ResponsesResponse, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::from_value(json!({
            "id": format!("resp_slow_{}", n),
            "model": request.model,
            "output": [{"type": "text", "text": "eventually"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        }))
        .expect("valid response"))
    }

    async fn create_stream(&self, _: &CanonicalRequest) -> Result<ChunkStream, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Switchable::outage())
    }
}

/// Single attempt per call, no fallback model, breaker opening after 5 failures
fn config() -> Config {
    config_with_retry("")
}

fn config_with_retry(extra: &str) -> Config {
    Config::from_str(&format!(
        r#"
[server]
host = "127.0.0.1"
port = 3000

[backend]
base_url = "http://backend.invalid/v1"
default_model = "gpt-5"
health_check_interval_seconds = 0

[retry]
max_attempts = 1
jitter = "none"
{extra}

[circuit_breaker]
failure_threshold = 5
reset_timeout_seconds = 60
"#
    ))
    .expect("config parses")
}

fn question(text: &str) -> String {
    json!({
        "model": "claude-3-5-sonnet-20241022",
        "messages": [{"role": "user", "content": text}],
        "max_tokens": 50
    })
    .to_string()
}

#[tokio::test]
async fn test_open_circuit_degrades_and_serves_fallbacks() {
    let backend = Arc::new(Switchable::default());
    let app = app_with_backend(config(), backend.clone());

    let live = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;
    assert_eq!(live.status, StatusCode::OK);
    assert!(live.header("x-respbridge-degraded").is_none());
    let live_body = live.json();

    backend.fail();
    for attempt in 1..=5 {
        let failed = post(&app.router, "/v1/messages", &question("What time is it?"), &[]).await;
        assert_eq!(
            failed.status,
            StatusCode::SERVICE_UNAVAILABLE,
            "call {} should surface the outage",
            attempt
        );
    }
    assert_eq!(backend.calls(), 6);

    let health = get(&app.router, "/health").await.json();
    assert_eq!(health["status"], "DEGRADED");
    assert_eq!(health["service_level"], "degraded");
    assert_eq!(health["open_circuits"], json!(["responses:gpt-5"]));

    let cached = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;
    assert_eq!(cached.status, StatusCode::OK);
    assert_eq!(cached.header("x-respbridge-degraded"), Some("cached"));
    assert_eq!(cached.json(), live_body);

    let notice = post(&app.router, "/v1/messages", &question("Something new"), &[]).await;
    assert_eq!(notice.status, StatusCode::OK);
    assert_eq!(notice.header("x-respbridge-degraded"), Some("notice"));
    let body = notice.json();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "graceful_degradation");

    assert_eq!(backend.calls(), 6, "degraded calls never reach the backend");
}

#[tokio::test]
async fn test_notice_uses_openai_shape() {
    let backend = Arc::new(Switchable::default());
    let app = app_with_backend(config(), backend.clone());
    app.state.degradation().degrade("test");

    let body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "Hi"}],
        "max_completion_tokens": 10
    });
    let notice = post(&app.router, "/v1/chat/completions", &body.to_string(), &[]).await;

    assert_eq!(notice.status, StatusCode::OK);
    let error = notice.json();
    assert_eq!(error["error"]["type"], "graceful_degradation");
    assert_eq!(error["error"]["code"], "service_degraded");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_restore_returns_to_backend_calls() {
    let backend = Arc::new(Switchable::default());
    let app = app_with_backend(config(), backend.clone());
    app.state.degradation().degrade("test");

    let restored = post(&app.router, "/admin/service-level/restore", "", &[]).await;
    assert_eq!(restored.status, StatusCode::OK);
    assert_eq!(restored.json(), json!({"service_level": "full", "changed": true}));

    let again = post(&app.router, "/admin/service-level/restore", "", &[]).await;
    assert_eq!(again.json()["changed"], false);

    let live = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;
    assert_eq!(live.status, StatusCode::OK);
    assert!(live.header("x-respbridge-degraded").is_none());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_open_circuit_short_circuits_after_restore() {
    let backend = Arc::new(Switchable::default());
    let app = app_with_backend(config(), backend.clone());
    backend.fail();
    for _ in 0..5 {
        post(&app.router, "/v1/messages", &claude_hello(), &[]).await;
    }
    post(&app.router, "/admin/service-level/restore", "", &[]).await;

    let response = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.header("retry-after").is_some());
    assert_eq!(backend.calls(), 5, "an open circuit rejects without calling");
}

#[tokio::test]
async fn test_streams_bypass_the_fallback_cache() {
    let backend = Arc::new(Switchable::default());
    let app = app_with_backend(config(), backend.clone());
    app.state.degradation().degrade("test");

    let body = json!({
        "model": "claude-3-5-sonnet-20241022",
        "messages": [{"role": "user", "content": "Hello"}],
        "max_tokens": 50,
        "stream": true
    });
    let response = post(&app.router, "/v1/messages", &body.to_string(), &[]).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_callers_hanging_up_leave_the_circuit_closed() {
    let backend = Arc::new(Slow::new(Duration::from_millis(300)));
    let app = app_with_backend(config(), backend.clone());

    for _ in 0..5 {
        let gave_up = tokio::time::timeout(
            Duration::from_millis(20),
            post(&app.router, "/v1/messages", &claude_hello(), &[]),
        )
        .await;
        assert!(gave_up.is_err(), "caller should stop waiting first");
    }
    assert_eq!(backend.calls(), 5);
    assert!(app.state.breaker().open_circuits().is_empty());

    let response = post(&app.router, "/v1/messages", &claude_hello(), &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.header("x-respbridge-degraded").is_none());
    assert!(response.header("retry-after").is_none());
    assert_eq!(backend.calls(), 6);
}

#[tokio::test]
async fn test_attempt_timeouts_still_open_the_circuit() {
    let backend = Arc::new(Slow::new(Duration::from_millis(300)));
    let app = app_with_backend(config_with_retry("attempt_timeout_ms = 20"), backend.clone());

    for attempt in 1..=5 {
        let timed_out = post(&app.router, "/v1/messages", &question("Slow one"), &[]).await;
        assert_ne!(timed_out.status, StatusCode::OK, "call {} should time out", attempt);
    }

    assert_eq!(app.state.breaker().open_circuits(), vec!["responses:gpt-5".to_string()]);
    post(&app.router, "/v1/messages", &question("Another"), &[]).await;
    assert_eq!(backend.calls(), 5, "an open circuit rejects without calling");
}
