//! Health check endpoint
//!
//! Reports gateway status for monitoring and load balancers. The endpoint
//! always answers 200 while the process is serving; a degraded service level
//! or open circuits show up in the body rather than the status code.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;
use crate::resilience::{ServiceLevel, ServiceLevelControl};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "OK" at full service, "DEGRADED" otherwise
    pub status: &'static str,
    /// "full" or "degraded"
    pub service_level: &'static str,
    /// Circuit keys that are open or half-open
    pub open_circuits: Vec<String>,
    /// Conversations currently tracked for continuity
    pub conversations: usize,
    /// Backend models currently marked unavailable
    pub unavailable_models: Vec<String>,
}

pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let level = state.degradation().current_service_level();
    let unavailable_models = state
        .health()
        .statuses()
        .await
        .into_iter()
        .filter(|s| !s.is_available())
        .map(|s| s.model().to_string())
        .collect();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: match level {
                ServiceLevel::Full => "OK",
                ServiceLevel::Degraded => "DEGRADED",
            },
            service_level: level.as_str(),
            open_circuits: state.breaker().open_circuits(),
            conversations: state.conversations().len(),
            unavailable_models,
        }),
    )
}
