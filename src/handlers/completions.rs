//! OpenAI Chat Completions endpoint
//!
//! Handles POST /v1/chat/completions, streaming and non-streaming. Requests
//! with no conclusive format signal are treated as OpenAI here.

use crate::formats::RequestFormat;
use crate::gateway;
use crate::handlers::AppState;
use crate::middleware::RequestId;
use axum::{
    Extension,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Response,
};

pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    gateway::handle(&state, RequestFormat::OpenAi, request_id, &headers, body).await
}
