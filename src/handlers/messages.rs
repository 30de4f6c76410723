//! Claude Messages endpoint
//!
//! Handles POST /v1/messages. The body is still run through format
//! detection, so an OpenAI-shaped request sent here is answered in OpenAI
//! format; the route only decides when detection is inconclusive.

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
    gateway::handle(&state, RequestFormat::Claude, request_id, &headers, body).await
}
