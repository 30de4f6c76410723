//! Request ID middleware for distributed tracing
//!
//! Every request gets a UUID correlation id. A caller may supply its own in
//! `x-request-id`; it is adopted only if it parses as a UUID, otherwise a new
//! one is generated. The id is available to handlers via Axum extensions and
//! echoed back in the response headers.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Request ID header name
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID wrapper type for Axum extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Adopt the caller's `x-request-id` when it is a well-formed UUID
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(REQUEST_ID_HEADER)?
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Self)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Middleware that attaches a request ID to each request and its response
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let adopted = RequestId::from_headers(request.headers());
    let request_id = adopted.unwrap_or_default();

    tracing::debug!(
        correlation_id = %request_id,
        adopted = adopted.is_some(),
        method = %request.method(),
        uri = %request.uri(),
        "Incoming request"
    );

    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, header_value);
    }

    response
}
