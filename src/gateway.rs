//! Request orchestration shared by the Claude and OpenAI routes
//!
//! One call runs: format detection → caller validation → conversation lookup
//! → model mapping and availability → normalization (reasoning decision) →
//! retried, circuit-guarded backend call → response transform, or error
//! mapping in the caller's format. While the service is degraded,
//! non-streaming calls are answered from the fallback cache without touching
//! the backend.

use crate::backend::{BackendError, ChunkStream};
use crate::conversation::{ConversationId, resolve_conversation_id};
use crate::error_mapper::{ErrorContext, MappedError};
use crate::formats::responses::{CanonicalRequest, ResponsesResponse};
use crate::formats::{RequestFormat, detect_format};
use crate::handlers::AppState;
use crate::metrics::{AttemptOutcome, CallMode, DegradedKind, log_recording_failure};
use crate::middleware::RequestId;
use crate::pipeline::{
    CallerRequest, NormalizeOptions, Normalized, SseFrame, StreamTranslator, normalize, to_claude,
    to_openai,
};
use crate::resilience::{
    AttemptTimeout, CircuitTransition, ClassifiableError, DEGRADED_HEADER, Fallback, RetryConfig, RetryFailure,
    ServiceLevelControl, input_fingerprint,
};
use axum::{
    Json,
    body::Bytes,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::convert::Infallible;
use std::future::Future;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Name of the retry strategy used for backend calls
pub const BACKEND_STRATEGY: &str = "backend";

pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";
pub const REASONING_EFFORT_HEADER: &str = "x-reasoning-effort";

const OPERATION_CREATE: &str = "responses.create";
const OPERATION_STREAM: &str = "responses.stream";
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Circuit breaker key for calls to `model`
pub fn circuit_key(model: &str) -> String {
    format!("responses:{}", model)
}

/// Default policy, except an open circuit is surfaced immediately
fn should_retry(config: &RetryConfig, error: &BackendError) -> bool {
    !matches!(error, BackendError::CircuitOpen { .. }) && config.is_retryable(error)
}

/// Everything resolved about a call before the backend is contacted
struct PreparedCall {
    format: RequestFormat,
    caller: CallerRequest,
    conversation: ConversationId,
    normalized: Normalized,
    fingerprint: String,
}

/// Run a caller request end to end and build the HTTP response
pub async fn handle(
    state: &AppState,
    route_default: RequestFormat,
    request_id: RequestId,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = request_id.to_string();

    let call = match prepare(state, route_default, &correlation_id, headers, &body).await {
        Ok(call) => call,
        Err(mapped) => return mapped.into_response(),
    };

    if state.degradation().should_serve_fallback() && !call.caller.stream() {
        return serve_fallback(state, &call, &correlation_id);
    }

    if call.caller.stream() {
        stream_call(state, call, correlation_id).await
    } else {
        unary_call(state, call, &correlation_id).await
    }
}

async fn prepare(
    state: &AppState,
    route_default: RequestFormat,
    correlation_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<PreparedCall, MappedError> {
    let parsed = serde_json::from_slice::<Value>(body);

    let detection_start = Instant::now();
    let detection = detect_format(parsed.as_ref().unwrap_or(&Value::Null), headers);
    let format = detection.resolve(route_default);
    let detection_ms = detection_start.elapsed().as_secs_f64() * 1000.0;

    let metrics = state.metrics();
    log_recording_failure(
        metrics,
        "record_detection_duration",
        correlation_id,
        metrics.record_detection_duration(detection_ms),
    );
    log_recording_failure(
        metrics,
        "record_request",
        correlation_id,
        metrics.record_request(format),
    );

    tracing::debug!(
        correlation_id = %correlation_id,
        format = %format,
        signal = ?detection.signal,
        detection_ms,
        "Caller format detected"
    );

    let ctx = ErrorContext {
        correlation_id,
        operation: "request.validate",
        format,
    };
    let body = parsed.map_err(|e| {
        state
            .mapper()
            .validation(ctx, &format!("request body is not valid JSON: {}", e))
    })?;
    let caller =
        CallerRequest::parse(format, body).map_err(|e| state.mapper().validation(ctx, &e))?;

    let input = caller.to_input();
    let conversation = resolve_conversation_id(headers, &input, caller.user_id());

    let config = state.config();
    let mapped_model = config.backend.map_model(caller.model());
    let backend_model = state
        .health()
        .resolve(mapped_model, config.backend.fallback_model())
        .await;

    let previous_response_id = if conversation.continues(&input) {
        state
            .conversations()
            .previous_response_id(conversation.as_str())
    } else {
        None
    };

    let normalized = normalize(
        &caller,
        NormalizeOptions {
            backend_model,
            previous_response_id,
            reasoning_enabled: config.reasoning.enabled,
            engine: config.reasoning.engine,
            default_max_output_tokens: config.reasoning.default_max_output_tokens,
        },
    );

    log_recording_failure(
        metrics,
        "record_reasoning",
        correlation_id,
        metrics.record_reasoning(&normalized.decision),
    );

    tracing::info!(
        correlation_id = %correlation_id,
        format = %format,
        conversation_id = %conversation,
        caller_model = %caller.model(),
        backend_model = %normalized.request.model,
        reasoning_effort = normalized.decision.effort_label(),
        reasoning_source = normalized.decision.source.as_str(),
        continues = normalized.request.previous_response_id.is_some(),
        stream = caller.stream(),
        "Request normalized"
    );

    let fingerprint = input_fingerprint(caller.model(), &input);

    Ok(PreparedCall {
        format,
        caller,
        conversation,
        normalized,
        fingerprint,
    })
}

fn serve_fallback(state: &AppState, call: &PreparedCall, correlation_id: &str) -> Response {
    let (kind, body) = match state.degradation().fallback(call.format, &call.fingerprint) {
        Fallback::Cached(body) => (DegradedKind::Cached, body),
        Fallback::Notice(body) => (DegradedKind::Notice, body),
    };

    tracing::warn!(
        correlation_id = %correlation_id,
        format = %call.format,
        kind = kind.as_str(),
        "Service degraded, answering without calling the backend"
    );
    let metrics = state.metrics();
    log_recording_failure(
        metrics,
        "record_degraded_response",
        correlation_id,
        metrics.record_degraded_response(kind),
    );

    let mut response = (StatusCode::OK, Json(body)).into_response();
    response.headers_mut().insert(
        HeaderName::from_static(DEGRADED_HEADER),
        HeaderValue::from_static(kind.as_str()),
    );
    insert_header(&mut response, CONVERSATION_ID_HEADER, call.conversation.as_str());
    response
}

async fn unary_call(state: &AppState, call: PreparedCall, correlation_id: &str) -> Response {
    let request = &call.normalized.request;
    let started = Instant::now();
    let result = call_backend(state, request, correlation_id, |backend, request| {
        backend.create(request)
    })
    .await;
    record_latency(state, CallMode::Unary, started, correlation_id);

    let response = match result {
        Ok(response) => response,
        Err(failure) => {
            return backend_failure(state, &call, correlation_id, OPERATION_CREATE, failure)
                .into_response();
        }
    };

    remember(state, &call.conversation, &response, correlation_id);

    let body = match render(call.format, &response, call.caller.model()) {
        Ok(body) => body,
        Err(e) => {
            let error = BackendError::Decode(format!("failed to encode response: {}", e));
            let ctx = ErrorContext {
                correlation_id,
                operation: OPERATION_CREATE,
                format: call.format,
            };
            return state.mapper().map(ctx, &error).into_response();
        }
    };

    if state.degradation().config().enabled {
        state
            .degradation()
            .store(call.format, &call.fingerprint, body.clone());
    }

    tracing::info!(
        correlation_id = %correlation_id,
        response_id = %response.id,
        total_tokens = response.usage.total_tokens,
        reasoning_tokens = ?response.usage.reasoning_tokens,
        latency_ms = started.elapsed().as_millis() as u64,
        "Backend call succeeded"
    );

    let mut http = (StatusCode::OK, Json(body)).into_response();
    success_headers(&mut http, &call);
    http
}

async fn stream_call(state: &AppState, call: PreparedCall, correlation_id: String) -> Response {
    let started = Instant::now();
    let opened = call_backend(
        state,
        &call.normalized.request,
        &correlation_id,
        |backend, request| backend.create_stream(request),
    )
    .await;

    let chunks = match opened {
        Ok(chunks) => chunks,
        Err(failure) => {
            record_latency(state, CallMode::Stream, started, &correlation_id);
            return backend_failure(state, &call, &correlation_id, OPERATION_STREAM, failure)
                .into_response();
        }
    };

    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let stream_id = match call.format {
        RequestFormat::Claude => format!("msg_{}", uuid::Uuid::new_v4().simple()),
        RequestFormat::OpenAi => format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
    };
    let translator = StreamTranslator::new(call.format, &stream_id, call.caller.model(), created);

    tracing::info!(
        correlation_id = %correlation_id,
        stream_id = %stream_id,
        "Streaming response started"
    );

    let events = sse_events(
        state.clone(),
        chunks,
        translator,
        SseContext {
            correlation_id,
            format: call.format,
            conversation_id: call.conversation.as_str().to_string(),
            model: call.normalized.request.model.clone(),
            started,
        },
    );

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
        .into_response();
    success_headers(&mut response, &call);
    response
}

/// Owned per-stream values the SSE task needs after the handler returns
struct SseContext {
    correlation_id: String,
    format: RequestFormat,
    conversation_id: String,
    model: String,
    started: Instant,
}

fn sse_events(
    state: AppState,
    mut chunks: ChunkStream,
    mut translator: StreamTranslator,
    ctx: SseContext,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut failed = false;
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    for frame in translator.push(&chunk) {
                        yield Ok(to_event(frame));
                    }
                }
                Err(error) => {
                    failed = true;
                    let key = circuit_key(&ctx.model);
                    if error.trips_breaker() {
                        note_transition(&state, state.breaker().record_failure(&key), &ctx.correlation_id);
                        state.health().mark_failure(&ctx.model).await;
                    }
                    let mapped = state.mapper().map(
                        ErrorContext {
                            correlation_id: &ctx.correlation_id,
                            operation: OPERATION_STREAM,
                            format: ctx.format,
                        },
                        &error,
                    );
                    for frame in translator.error(&mapped.client_response) {
                        yield Ok(to_event(frame));
                    }
                    break;
                }
            }
        }

        if !failed {
            for frame in translator.finish() {
                yield Ok(to_event(frame));
            }
            let summary = translator.summary();
            if let Some(response_id) = summary.response_id.as_deref() {
                state
                    .conversations()
                    .record_success(&ctx.conversation_id, response_id, &summary.usage);
                state.metrics().set_conversations(state.conversations().len());
            }
        }

        record_latency(&state, CallMode::Stream, ctx.started, &ctx.correlation_id);
        tracing::info!(
            correlation_id = %ctx.correlation_id,
            failed,
            duration_ms = ctx.started.elapsed().as_millis() as u64,
            "Streaming response finished"
        );
    }
}

fn to_event(frame: SseFrame) -> Event {
    let event = Event::default().data(frame.data);
    match frame.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Run one backend operation through the named retry strategy
///
/// Every attempt is gated by the circuit breaker for the target model and
/// reports its outcome to the breaker and to model health. Attempts enforce
/// `attempt_timeout` themselves so an expiry is settled as a failure, while
/// an attempt dropped by a departing caller records nothing.
async fn call_backend<'a, T, F, Fut>(
    state: &'a AppState,
    request: &'a CanonicalRequest,
    correlation_id: &'a str,
    call: F,
) -> Result<T, RetryFailure<BackendError>>
where
    F: Fn(&'a dyn crate::backend::ResponsesBackend, &'a CanonicalRequest) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let strategy = state.retries().get(BACKEND_STRATEGY);
    let retry_config = strategy.config();
    let key = circuit_key(&request.model);
    let guard = AttemptGuard {
        state,
        key: &key,
        model: &request.model,
        correlation_id,
        retry_config,
    };
    let guard = &guard;
    let backend = state.backend();
    let call = &call;

    let outcome = strategy
        .execute_self_timed(
            move |attempt| guard.run(attempt, move || call(backend, request)),
            |error: &BackendError| should_retry(retry_config, error),
        )
        .await;

    match outcome {
        Ok(success) => Ok(success.value),
        Err(failure) => {
            if failure.exhausted {
                state.metrics().record_retry_exhausted();
            }
            Err(failure)
        }
    }
}

struct AttemptGuard<'a> {
    state: &'a AppState,
    key: &'a str,
    model: &'a str,
    correlation_id: &'a str,
    retry_config: &'a RetryConfig,
}

impl AttemptGuard<'_> {
    async fn run<T, F, Fut>(&self, attempt: u32, call: F) -> Result<T, BackendError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        match self.state.breaker().try_acquire(self.key) {
            Ok(transition) => note_transition(self.state, transition, self.correlation_id),
            Err(open) => {
                tracing::debug!(
                    correlation_id = %self.correlation_id,
                    circuit = %self.key,
                    attempt,
                    remaining_ms = open.remaining.as_millis() as u64,
                    "Circuit open, skipping backend call"
                );
                self.record_outcome(AttemptOutcome::ShortCircuited);
                return Err(BackendError::from(open));
            }
        }

        let mut in_flight = InFlight {
            guard: self,
            settled: false,
        };
        let result = match self.retry_config.attempt_timeout() {
            Some(limit) => tokio::time::timeout(limit, call())
                .await
                .unwrap_or_else(|_| Err(BackendError::from(AttemptTimeout { after: limit }))),
            None => call().await,
        };
        in_flight.settled = true;

        match result {
            Ok(value) => {
                note_transition(
                    self.state,
                    self.state.breaker().record_success(self.key),
                    self.correlation_id,
                );
                self.state.health().mark_success(self.model).await;
                self.record_outcome(AttemptOutcome::Success);
                Ok(value)
            }
            Err(error) => {
                if error.trips_breaker() {
                    note_transition(
                        self.state,
                        self.state.breaker().record_failure(self.key),
                        self.correlation_id,
                    );
                    self.state.health().mark_failure(self.model).await;
                } else {
                    // The backend answered, so the probe slot (if any) is released.
                    note_transition(
                        self.state,
                        self.state.breaker().record_success(self.key),
                        self.correlation_id,
                    );
                }
                let outcome = if should_retry(self.retry_config, &error) {
                    AttemptOutcome::RetryableFailure
                } else {
                    AttemptOutcome::FatalFailure
                };
                tracing::debug!(
                    correlation_id = %self.correlation_id,
                    attempt,
                    error_name = error.name(),
                    outcome = outcome.as_str(),
                    "Backend attempt failed"
                );
                self.record_outcome(outcome);
                Err(error)
            }
        }
    }

    fn record_outcome(&self, outcome: AttemptOutcome) {
        let metrics = self.state.metrics();
        log_recording_failure(
            metrics,
            "record_backend_attempt",
            self.correlation_id,
            metrics.record_backend_attempt(outcome),
        );
    }
}

/// Returns the admission of an attempt dropped before it settled
///
/// Only a caller going away drops an attempt mid-call, since timeouts settle
/// inside [`AttemptGuard::run`]. No outcome is recorded.
struct InFlight<'g, 'a> {
    guard: &'g AttemptGuard<'a>,
    settled: bool,
}

impl Drop for InFlight<'_, '_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let guard = self.guard;
        tracing::debug!(
            correlation_id = %guard.correlation_id,
            circuit = %guard.key,
            "Backend attempt abandoned before it settled"
        );
        guard.state.breaker().release(guard.key);
    }
}

fn note_transition(state: &AppState, transition: Option<CircuitTransition>, correlation_id: &str) {
    let Some(transition) = transition else {
        return;
    };
    tracing::info!(
        correlation_id = %correlation_id,
        circuit = %transition.key,
        from = transition.from.as_str(),
        to = transition.to.as_str(),
        "Circuit state changed"
    );
    let metrics = state.metrics();
    log_recording_failure(
        metrics,
        "record_circuit_transition",
        correlation_id,
        metrics.record_circuit_transition(transition.to),
    );
}

fn backend_failure(
    state: &AppState,
    call: &PreparedCall,
    correlation_id: &str,
    operation: &str,
    failure: RetryFailure<BackendError>,
) -> MappedError {
    let key = circuit_key(&call.normalized.request.model);
    if state.degradation().on_failure(&key, state.breaker()) {
        tracing::warn!(
            correlation_id = %correlation_id,
            circuit = %key,
            "Service level lowered after circuit opened"
        );
    }

    tracing::warn!(
        correlation_id = %correlation_id,
        attempts = failure.attempts.len(),
        exhausted = failure.exhausted,
        "Backend call failed"
    );

    state.mapper().map(
        ErrorContext {
            correlation_id,
            operation,
            format: call.format,
        },
        &failure.error,
    )
}

fn remember(
    state: &AppState,
    conversation: &ConversationId,
    response: &ResponsesResponse,
    correlation_id: &str,
) {
    let record =
        state
            .conversations()
            .record_success(conversation.as_str(), &response.id, &response.usage);
    state.metrics().set_conversations(state.conversations().len());
    tracing::debug!(
        correlation_id = %correlation_id,
        conversation_id = %conversation,
        message_count = record.message_count(),
        total_tokens_used = record.total_tokens_used(),
        "Conversation updated"
    );
}

fn render(
    format: RequestFormat,
    response: &ResponsesResponse,
    caller_model: &str,
) -> Result<Value, serde_json::Error> {
    match format {
        RequestFormat::Claude => serde_json::to_value(to_claude(response, caller_model)),
        RequestFormat::OpenAi => serde_json::to_value(to_openai(response, caller_model)),
    }
}

fn success_headers(response: &mut Response, call: &PreparedCall) {
    insert_header(response, CONVERSATION_ID_HEADER, call.conversation.as_str());
    if let Some(effort) = call.normalized.decision.effort {
        insert_header(response, REASONING_EFFORT_HEADER, effort.as_str());
    }
}

fn insert_header(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
}

fn record_latency(state: &AppState, mode: CallMode, started: Instant, correlation_id: &str) {
    let metrics = state.metrics();
    log_recording_failure(
        metrics,
        "record_backend_latency",
        correlation_id,
        metrics.record_backend_latency(mode, started.elapsed().as_secs_f64() * 1000.0),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_circuit_key_is_per_model() {
        assert_eq!(circuit_key("gpt-5"), "responses:gpt-5");
        assert_ne!(circuit_key("gpt-5"), circuit_key("gpt-5-mini"));
    }

    #[test]
    fn test_open_circuit_is_never_retried() {
        let config = RetryConfig::default();
        let open = BackendError::CircuitOpen {
            key: circuit_key("gpt-5"),
            remaining: Duration::from_secs(3),
        };
        assert!(!should_retry(&config, &open));

        let reset = BackendError::Transport {
            code: "ECONNRESET".to_string(),
            message: "connection reset by peer".to_string(),
        };
        assert!(should_retry(&config, &reset));
    }

    #[test]
    fn test_rate_limit_retry_follows_config() {
        let limited = BackendError::Api {
            status: 429,
            body: json!({"error": {"type": "rate_limit_error", "message": "slow down"}}),
            retry_after: None,
        };
        assert!(!should_retry(&RetryConfig::default(), &limited));
        assert!(should_retry(
            &RetryConfig::default().with_rate_limit_retries(true),
            &limited
        ));
    }
}
