//! Backend model availability
//!
//! Tracks per-model health from real call outcomes and optional background
//! probes. Models start available.
//! - 3 consecutive failures → unavailable
//! - 1 success → available again
//!
//! Models the tracker has never seen count as available, so a caller mapping
//! to an unlisted model is never blocked by health state.

use super::client::ResponsesBackend;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Consecutive failures before a model is marked unavailable
pub const UNAVAILABLE_AFTER_FAILURES: u32 = 3;

/// Health state for one backend model
#[derive(Clone, Debug)]
pub struct ModelStatus {
    model: String,
    available: bool,
    last_check: Instant,
    consecutive_failures: u32,
}

impl ModelStatus {
    fn new(model: String) -> Self {
        Self {
            model,
            available: true,
            last_check: Instant::now(),
            consecutive_failures: 0,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn last_check(&self) -> Instant {
        self.last_check
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

pub struct ModelHealth {
    statuses: RwLock<HashMap<String, ModelStatus>>,
}

impl ModelHealth {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statuses: HashMap<String, ModelStatus> = models
            .into_iter()
            .map(Into::into)
            .map(|model: String| (model.clone(), ModelStatus::new(model)))
            .collect();

        tracing::info!(
            tracked_models = statuses.len(),
            "ModelHealth initialized with all models available"
        );

        Self {
            statuses: RwLock::new(statuses),
        }
    }

    pub async fn is_available(&self, model: &str) -> bool {
        let statuses = self.statuses.read().await;
        statuses.get(model).map(|s| s.available).unwrap_or(true)
    }

    /// Model to call: `model` itself, or `fallback` when `model` is
    /// unavailable and the fallback is not
    pub async fn resolve(&self, model: &str, fallback: Option<&str>) -> String {
        if self.is_available(model).await {
            return model.to_string();
        }
        match fallback {
            Some(fallback) if fallback != model && self.is_available(fallback).await => {
                tracing::warn!(
                    model = %model,
                    fallback = %fallback,
                    "Model unavailable, substituting fallback model"
                );
                fallback.to_string()
            }
            _ => {
                tracing::warn!(
                    model = %model,
                    "Model unavailable and no usable fallback, calling it anyway"
                );
                model.to_string()
            }
        }
    }

    pub async fn mark_failure(&self, model: &str) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(model.to_string())
            .or_insert_with(|| ModelStatus::new(model.to_string()));

        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.last_check = Instant::now();

        if status.consecutive_failures >= UNAVAILABLE_AFTER_FAILURES {
            if status.available {
                tracing::warn!(
                    model = %status.model,
                    consecutive_failures = status.consecutive_failures,
                    "Model marked unavailable after consecutive failures"
                );
            }
            status.available = false;
        } else {
            tracing::debug!(
                model = %status.model,
                consecutive_failures = status.consecutive_failures,
                "Model failure recorded (still available)"
            );
        }
    }

    pub async fn mark_success(&self, model: &str) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(model.to_string())
            .or_insert_with(|| ModelStatus::new(model.to_string()));

        let was_unavailable = !status.available;
        status.consecutive_failures = 0;
        status.available = true;
        status.last_check = Instant::now();

        if was_unavailable {
            tracing::info!(model = %status.model, "Model recovered to available");
        }
    }

    pub async fn statuses(&self) -> Vec<ModelStatus> {
        let statuses = self.statuses.read().await;
        let mut all: Vec<ModelStatus> = statuses.values().cloned().collect();
        all.sort_by(|a, b| a.model.cmp(&b.model));
        all
    }

    /// Probe the backend once and apply the result to every tracked model
    pub async fn run_probe(&self, backend: &dyn ResponsesBackend) {
        let alive = backend.probe().await;
        let models: Vec<String> = self.statuses.read().await.keys().cloned().collect();
        for model in models {
            if alive {
                self.mark_success(&model).await;
            } else {
                self.mark_failure(&model).await;
            }
        }
    }

    /// Spawn periodic probing plus a monitor that reports if the loop dies
    pub fn start_background_checks(
        self: Arc<Self>,
        backend: Arc<dyn ResponsesBackend>,
        interval: Duration,
    ) {
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Starting background backend health checks"
            );
            loop {
                tokio::time::sleep(interval).await;
                tracing::debug!("Running scheduled backend probe");
                self.run_probe(backend.as_ref()).await;
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => {
                    tracing::error!(
                        "Background health check task terminated unexpectedly. \
                        Models marked unavailable stay that way until a call succeeds."
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Background health check task panicked. \
                        Models marked unavailable stay that way until a call succeeds."
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ChunkStream};
    use crate::formats::responses::{CanonicalRequest, ResponsesResponse};
    use async_trait::async_trait;

    struct ProbeOnly(bool);

    #[async_trait]
    impl ResponsesBackend for ProbeOnly {
        async fn create(&self, _: &CanonicalRequest) -> Result<ResponsesResponse, BackendError> {
            Err(BackendError::Decode("unused".to_string()))
        }

        async fn create_stream(&self, _: &CanonicalRequest) -> Result<ChunkStream, BackendError> {
            Err(BackendError::Decode("unused".to_string()))
        }

        async fn probe(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn test_three_failures_mark_unavailable() {
        let health = ModelHealth::new(["gpt-5"]);
        health.mark_failure("gpt-5").await;
        health.mark_failure("gpt-5").await;
        assert!(health.is_available("gpt-5").await);
        health.mark_failure("gpt-5").await;
        assert!(!health.is_available("gpt-5").await);

        health.mark_success("gpt-5").await;
        assert!(health.is_available("gpt-5").await);
    }

    #[tokio::test]
    async fn test_unknown_models_are_available() {
        let health = ModelHealth::new(["gpt-5"]);
        assert!(health.is_available("never-seen").await);
    }

    #[tokio::test]
    async fn test_resolve_substitutes_fallback() {
        let health = ModelHealth::new(["gpt-5", "gpt-5-mini"]);
        for _ in 0..3 {
            health.mark_failure("gpt-5").await;
        }
        assert_eq!(health.resolve("gpt-5", Some("gpt-5-mini")).await, "gpt-5-mini");
        assert_eq!(health.resolve("gpt-5", None).await, "gpt-5");

        for _ in 0..3 {
            health.mark_failure("gpt-5-mini").await;
        }
        assert_eq!(health.resolve("gpt-5", Some("gpt-5-mini")).await, "gpt-5");
    }

    #[tokio::test]
    async fn test_probe_applies_to_all_models() {
        let health = ModelHealth::new(["a", "b"]);
        for _ in 0..3 {
            health.run_probe(&ProbeOnly(false)).await;
        }
        assert!(!health.is_available("a").await);
        assert!(!health.is_available("b").await);

        health.run_probe(&ProbeOnly(true)).await;
        assert!(health.statuses().await.iter().all(ModelStatus::is_available));
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let health = Arc::new(ModelHealth::new(["gpt-5"]));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let health = Arc::clone(&health);
            handles.push(tokio::spawn(async move {
                health.mark_failure("gpt-5").await;
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }
        let statuses = health.statuses().await;
        assert_eq!(statuses[0].consecutive_failures(), 20);
    }
}
