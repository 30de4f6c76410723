//! Operator endpoints

use axum::{Json, extract::State};
use serde::Serialize;

use crate::handlers::AppState;
use crate::resilience::ServiceLevelControl;

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub service_level: &'static str,
    /// False when the service was already at full level
    pub changed: bool,
}

/// POST /admin/service-level/restore
///
/// Open circuits are left alone; they close on their own once a probe call
/// succeeds.
pub async fn restore(State(state): State<AppState>) -> Json<RestoreResponse> {
    let changed = state.degradation().restore();
    tracing::info!(changed, "Manual service level restore requested");
    Json(RestoreResponse {
        service_level: state.degradation().current_service_level().as_str(),
        changed,
    })
}
