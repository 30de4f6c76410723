//! Multi-turn calls reuse the backend's stored response instead of resending
//! the whole history

mod common;

use axum::http::StatusCode;
use common::{app_for, backend_requests, backend_response, post};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_sequence(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(backend_response("resp_first", "Ownership means...")),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(backend_response("resp_second", "Borrowing means...")),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_second_turn_sends_previous_response_id_and_new_turns() {
    let server = MockServer::start().await;
    mount_sequence(&server).await;
    let app = app_for(&server, "");

    let opening = json!({
        "model": "claude-3-5-sonnet-20241022",
        "system": "You teach Rust.",
        "messages": [{"role": "user", "content": "Explain the ownership rules in Rust"}],
        "max_tokens": 200
    });
    let first = post(&app.router, "/v1/messages", &opening.to_string(), &[]).await;
    assert_eq!(first.status, StatusCode::OK);
    let conversation_id = first
        .header("x-conversation-id")
        .expect("conversation id header")
        .to_string();
    assert!(conversation_id.starts_with("conv-"));

    let follow_up = json!({
        "model": "claude-3-5-sonnet-20241022",
        "system": "You teach Rust.",
        "messages": [
            {"role": "user", "content": "Explain the ownership rules in Rust"},
            {"role": "assistant", "content": "Ownership means..."},
            {"role": "user", "content": "And borrowing?"}
        ],
        "max_tokens": 200
    });
    let second = post(&app.router, "/v1/messages", &follow_up.to_string(), &[]).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-conversation-id"), Some(conversation_id.as_str()));

    let sent = backend_requests(&server).await;
    assert_eq!(sent.len(), 2);
    assert!(sent[0].get("previous_response_id").is_none());
    assert_eq!(sent[1]["previous_response_id"], "resp_first");
    assert_eq!(
        sent[1]["input"],
        json!([
            {"role": "system", "content": "You teach Rust."},
            {"role": "user", "content": "And borrowing?"}
        ])
    );

    let record = app
        .state
        .conversations()
        .get(&conversation_id)
        .expect("conversation tracked");
    assert_eq!(record.last_response_id(), "resp_second");
    assert_eq!(record.message_count(), 2);
}

#[tokio::test]
async fn test_repeated_opening_starts_fresh() {
    let server = MockServer::start().await;
    mount_sequence(&server).await;
    let app = app_for(&server, "");

    let opening = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "Explain the ownership rules in Rust"}]
    });
    post(&app.router, "/v1/chat/completions", &opening.to_string(), &[]).await;
    post(&app.router, "/v1/chat/completions", &opening.to_string(), &[]).await;

    let sent = backend_requests(&server).await;
    assert!(sent[1].get("previous_response_id").is_none());
}

#[tokio::test]
async fn test_explicit_conversation_header_continues() {
    let server = MockServer::start().await;
    mount_sequence(&server).await;
    let app = app_for(&server, "");

    let headers = [("x-conversation-id", "support-ticket-42")];
    let body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "Hi"}]
    });
    let first = post(&app.router, "/v1/chat/completions", &body.to_string(), &headers).await;
    assert_eq!(first.header("x-conversation-id"), Some("support-ticket-42"));

    let follow_up = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "Still there?"}]
    });
    post(&app.router, "/v1/chat/completions", &follow_up.to_string(), &headers).await;

    let sent = backend_requests(&server).await;
    assert_eq!(sent[1]["previous_response_id"], "resp_first");
    assert_eq!(sent[1]["input"], json!([{"role": "user", "content": "Still there?"}]));
}
