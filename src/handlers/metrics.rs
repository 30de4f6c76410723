//! Prometheus metrics endpoint
//!
//! Exposes metrics in Prometheus text format for scraping.

use axum::extract::State;

use crate::error::AppError;
use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if metrics encoding fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/metrics
/// # HELP respbridge_requests_total Total number of gateway requests by detected caller format
/// # TYPE respbridge_requests_total counter
/// respbridge_requests_total{format="claude"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics().gather().map_err(|e| {
        tracing::error!(error = %e, "Failed to gather metrics for Prometheus scraping");
        AppError::Metrics(e)
    })
}
