//! Prometheus metrics collection for respbridge
//!
//! This module provides metrics instrumentation for tracking:
//! - Requests by detected caller format
//! - Reasoning decisions by effort and deciding component
//! - Backend attempts, retry exhaustion and latency
//! - Circuit breaker transitions and degraded responses
//! - Tracked conversation count
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! Every label comes from a closed enum, so cardinality is bounded.

use crate::analysis::ReasoningDecision;
use crate::formats::RequestFormat;
use crate::resilience::CircuitState;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

/// Outcome of a single backend attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Failed and will be (or could have been) retried
    RetryableFailure,
    /// Failed with an error the retry policy never retries
    FatalFailure,
    /// Rejected by an open circuit without calling the backend
    ShortCircuited,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::RetryableFailure => "retryable_failure",
            AttemptOutcome::FatalFailure => "fatal_failure",
            AttemptOutcome::ShortCircuited => "short_circuited",
        }
    }
}

/// How a degraded call was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedKind {
    Cached,
    Notice,
}

impl DegradedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradedKind::Cached => "cached",
            DegradedKind::Notice => "notice",
        }
    }
}

/// Whether a backend call was streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Unary,
    Stream,
}

impl CallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMode::Unary => "unary",
            CallMode::Stream => "stream",
        }
    }
}

/// Gateway metrics, registered on an explicitly constructed registry
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    reasoning_decisions: IntCounterVec,
    backend_attempts: IntCounterVec,
    retry_exhausted: IntCounter,
    circuit_transitions: IntCounterVec,
    degraded_responses: IntCounterVec,
    conversations: IntGauge,
    backend_latency: HistogramVec,
    detection_duration: Histogram,
    metrics_recording_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 2 formats
        let requests_total = IntCounterVec::new(
            Opts::new(
                "respbridge_requests_total",
                "Total number of gateway requests by detected caller format",
            ),
            &["format"],
        )?;

        // Cardinality: 4 efforts (none included) × 4 sources
        let reasoning_decisions = IntCounterVec::new(
            Opts::new(
                "respbridge_reasoning_decisions_total",
                "Reasoning effort decisions by effort and deciding component",
            ),
            &["effort", "source"],
        )?;

        let backend_attempts = IntCounterVec::new(
            Opts::new(
                "respbridge_backend_attempts_total",
                "Backend call attempts by outcome",
            ),
            &["outcome"],
        )?;

        let retry_exhausted = IntCounter::with_opts(Opts::new(
            "respbridge_retry_exhausted_total",
            "Calls that failed after using every retry attempt",
        ))?;

        let circuit_transitions = IntCounterVec::new(
            Opts::new(
                "respbridge_circuit_transitions_total",
                "Circuit breaker state transitions by target state",
            ),
            &["state"],
        )?;

        let degraded_responses = IntCounterVec::new(
            Opts::new(
                "respbridge_degraded_responses_total",
                "Responses served in degraded mode by kind (cached or notice)",
            ),
            &["kind"],
        )?;

        let conversations = IntGauge::with_opts(Opts::new(
            "respbridge_conversations",
            "Conversations currently tracked for continuity",
        ))?;

        let backend_latency = HistogramVec::new(
            HistogramOpts::new(
                "respbridge_backend_latency_ms",
                "Backend call latency in milliseconds, retries included",
            )
            .buckets(vec![
                50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
            ]),
            &["mode"],
        )?;

        let detection_duration = Histogram::with_opts(
            HistogramOpts::new(
                "respbridge_format_detection_duration_ms",
                "Format detection latency in milliseconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "respbridge_metrics_recording_failures_total",
                "Metrics recording operation failures by operation. \
                Indicates Prometheus internal errors.",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(reasoning_decisions.clone()))?;
        registry.register(Box::new(backend_attempts.clone()))?;
        registry.register(Box::new(retry_exhausted.clone()))?;
        registry.register(Box::new(circuit_transitions.clone()))?;
        registry.register(Box::new(degraded_responses.clone()))?;
        registry.register(Box::new(conversations.clone()))?;
        registry.register(Box::new(backend_latency.clone()))?;
        registry.register(Box::new(detection_duration.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            reasoning_decisions,
            backend_attempts,
            retry_exhausted,
            circuit_transitions,
            degraded_responses,
            conversations,
            backend_latency,
            detection_duration,
            metrics_recording_failures,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the label set does not match the metric.
    pub fn record_request(&self, format: RequestFormat) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[format.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_reasoning(&self, decision: &ReasoningDecision) -> Result<(), prometheus::Error> {
        self.reasoning_decisions
            .get_metric_with_label_values(&[decision.effort_label(), decision.source.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_backend_attempt(&self, outcome: AttemptOutcome) -> Result<(), prometheus::Error> {
        self.backend_attempts
            .get_metric_with_label_values(&[outcome.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_retry_exhausted(&self) {
        self.retry_exhausted.inc();
    }

    pub fn record_circuit_transition(&self, to: CircuitState) -> Result<(), prometheus::Error> {
        self.circuit_transitions
            .get_metric_with_label_values(&[to.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_degraded_response(&self, kind: DegradedKind) -> Result<(), prometheus::Error> {
        self.degraded_responses
            .get_metric_with_label_values(&[kind.as_str()])?
            .inc();
        Ok(())
    }

    pub fn set_conversations(&self, count: usize) {
        self.conversations
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// # Errors
    ///
    /// Returns an error for negative or non-finite durations.
    pub fn record_backend_latency(
        &self,
        mode: CallMode,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "invalid backend latency: {} ms",
                duration_ms
            )));
        }
        self.backend_latency
            .get_metric_with_label_values(&[mode.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    pub fn record_detection_duration(&self, duration_ms: f64) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "invalid detection duration: {} ms",
                duration_ms
            )));
        }
        self.detection_duration.observe(duration_ms);
        Ok(())
    }

    /// Count a failed `record_*` call; the request itself carries on
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    pub fn metrics_recording_failures_count(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == "respbridge_metrics_recording_failures_total")
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_count,
                    "Prometheus text encoder failed"
                );
                prometheus::Error::Msg(format!(
                    "Failed to encode {} metric families: {}",
                    metric_count, e
                ))
            })?;

        String::from_utf8(buffer).map_err(|e| {
            tracing::error!(
                invalid_byte_index = e.utf8_error().valid_up_to(),
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
        })
    }
}

/// Log and count a failed metrics call without failing the request
pub fn log_recording_failure(
    metrics: &Metrics,
    operation: &str,
    correlation_id: &str,
    result: Result<(), prometheus::Error>,
) {
    if let Err(e) = result {
        tracing::error!(
            correlation_id = %correlation_id,
            operation = %operation,
            error = %e,
            "Metrics recording failed, continuing request"
        );
        metrics.metrics_recording_failure(operation);
    }
}
