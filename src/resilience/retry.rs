//! Retry strategy engine
//!
//! Runs an async operation with bounded attempts, exponential backoff with
//! optional jitter and a per-attempt timeout. The loop is an explicit state
//! machine (`Attempting → Waiting → Attempting → … → done`) driven by a
//! [`Sleeper`], so tests can swap real timers for a recording fake.

use crate::sanitize::sanitize;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default maximum attempts per call (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the second attempt
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default backoff ceiling
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Error names, messages and codes retried by default
pub const DEFAULT_RETRYABLE: &[&str] = &[
    "NetworkError",
    "TimeoutError",
    "NETWORK_ERROR",
    "TIMEOUT_ERROR",
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EPIPE",
    "EAI_AGAIN",
    "ServiceUnavailableError",
];

/// Added to the retryable set when rate-limit retries are enabled
pub const RATE_LIMIT_RETRYABLE: &[&str] = &["RateLimitError", "rate_limit_error"];

/// Timer abstraction the retry loop waits on
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real timer; suspends the task without holding a worker thread
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records requested delays and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        match self.delays.lock() {
            Ok(mut delays) => delays.push(duration),
            Err(poisoned) => poisoned.into_inner().push(duration),
        }
    }
}

/// Jitter added on top of the capped backoff delay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    None,
    /// Uniform in `0..=jitter_factor * delay`
    #[default]
    Proportional,
    /// Uniform in `0..=base_delay`
    Uniform,
}

/// An error the retry engine can classify
///
/// `Display` supplies the message used for substring matching.
pub trait ClassifiableError: std::fmt::Display {
    /// Error name, e.g. `NetworkError` or `RateLimitError`
    fn name(&self) -> &str;

    /// Transport-style code such as `ECONNRESET`
    fn code(&self) -> Option<&str> {
        None
    }

    /// Validation, authorization and not-found failures are never retried by
    /// the default policy, whatever their message says
    fn is_fatal(&self) -> bool {
        false
    }
}

/// The operation did not settle within the per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("TimeoutError: attempt timed out after {}ms", .after.as_millis())]
pub struct AttemptTimeout {
    pub after: Duration,
}

/// Validated retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: Jitter,
    jitter_factor: f64,
    attempt_timeout: Option<Duration>,
    retry_on_rate_limit: bool,
    retryable: Vec<String>,
}

impl RetryConfig {
    /// # Errors
    /// Rejects zero attempts, `max_delay < base_delay` and multipliers below 1
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, &'static str> {
        if max_attempts == 0 {
            return Err("max_attempts must be at least 1");
        }
        if max_delay < base_delay {
            return Err("max_delay must be greater than or equal to base_delay");
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be a finite number >= 1.0");
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: Jitter::None,
            jitter_factor: 0.0,
            attempt_timeout: None,
            retry_on_rate_limit: false,
            retryable: DEFAULT_RETRYABLE.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// # Errors
    /// Rejects a jitter factor outside `[0, 1]`
    pub fn with_jitter(mut self, jitter: Jitter, jitter_factor: f64) -> Result<Self, &'static str> {
        if !(0.0..=1.0).contains(&jitter_factor) {
            return Err("jitter_factor must be between 0.0 and 1.0");
        }
        self.jitter = jitter;
        self.jitter_factor = jitter_factor;
        Ok(self)
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_rate_limit_retries(mut self, enabled: bool) -> Self {
        self.retry_on_rate_limit = enabled;
        self
    }

    /// Replace the retryable name/message/code set
    pub fn with_retryable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    pub fn retry_on_rate_limit(&self) -> bool {
        self.retry_on_rate_limit
    }

    fn is_listed(&self, value: &str) -> bool {
        self.retryable.iter().any(|r| r == value)
            || (self.retry_on_rate_limit && RATE_LIMIT_RETRYABLE.contains(&value))
    }

    fn message_matches(&self, message: &str) -> bool {
        self.retryable.iter().any(|r| message.contains(r.as_str()))
            || (self.retry_on_rate_limit
                && RATE_LIMIT_RETRYABLE.iter().any(|r| message.contains(r)))
    }

    /// Default policy: fatal exclusion, then name, then message, then code
    pub fn is_retryable<E: ClassifiableError + ?Sized>(&self, error: &E) -> bool {
        if error.is_fatal() {
            return false;
        }
        if self.is_listed(error.name()) {
            return true;
        }
        if self.message_matches(&error.to_string()) {
            return true;
        }
        error.code().is_some_and(|code| self.is_listed(code))
    }

    /// Capped backoff before the attempt following failed attempt `failed_attempt`
    ///
    /// `min(base * multiplier^(failed_attempt - 1), max_delay)`, so the second
    /// attempt waits `base_delay`.
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let delay_ms = base_ms * self.backoff_multiplier.powi(exponent);
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        if !delay_ms.is_finite() || delay_ms >= max_ms {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_ms / 1000.0)
    }

    /// Backoff delay plus jitter
    pub fn delay_with_jitter(&self, failed_attempt: u32) -> Duration {
        let delay = self.backoff_delay(failed_attempt);
        let spread = match self.jitter {
            Jitter::None => Duration::ZERO,
            Jitter::Proportional => delay.mul_f64(self.jitter_factor),
            Jitter::Uniform => self.base_delay,
        };
        if spread.is_zero() {
            return delay;
        }
        let extra = rand::rng().random_range(0.0..=spread.as_secs_f64());
        delay + Duration::from_secs_f64(extra)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            DEFAULT_BACKOFF_MULTIPLIER,
        )
        .and_then(|c| c.with_jitter(Jitter::Proportional, DEFAULT_JITTER_FACTOR))
        .expect("default RetryConfig values must be valid")
    }
}

/// Per-name overrides merged over a registry's default config
#[derive(Debug, Clone, Default)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<Jitter>,
    pub jitter_factor: Option<f64>,
    pub attempt_timeout: Option<Duration>,
    pub retry_on_rate_limit: Option<bool>,
}

impl RetryOverrides {
    /// # Errors
    /// Fails when the merged values do not form a valid [`RetryConfig`]
    pub fn merge_over(&self, defaults: &RetryConfig) -> Result<RetryConfig, &'static str> {
        let merged = RetryConfig::new(
            self.max_attempts.unwrap_or(defaults.max_attempts),
            self.base_delay.unwrap_or(defaults.base_delay),
            self.max_delay.unwrap_or(defaults.max_delay),
            self.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
        )?
        .with_jitter(
            self.jitter.unwrap_or(defaults.jitter),
            self.jitter_factor.unwrap_or(defaults.jitter_factor),
        )?
        .with_attempt_timeout(self.attempt_timeout.or(defaults.attempt_timeout))
        .with_rate_limit_retries(self.retry_on_rate_limit.unwrap_or(defaults.retry_on_rate_limit))
        .with_retryable(defaults.retryable.iter().cloned());
        Ok(merged)
    }
}

/// One entry of the per-call attempt log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    /// Wait before this attempt started; zero for the first
    pub delay: Duration,
    /// Sanitized failure message, `None` when the attempt succeeded
    pub error: Option<String>,
    pub started_at: Instant,
    pub finished_at: Instant,
}

#[derive(Debug)]
pub struct RetrySuccess<T> {
    pub value: T,
    pub attempts: Vec<RetryAttempt>,
}

#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: Vec<RetryAttempt>,
    /// `true` when every attempt was used; `false` for a non-retryable stop
    pub exhausted: bool,
}

/// Aggregate metrics for one named strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RetryMetrics {
    /// Calls made through the strategy
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    /// Mean operation invocations per call
    pub average_attempts: f64,
    pub average_duration_ms: f64,
}

#[derive(Debug, Default)]
struct MetricsState {
    calls: u64,
    successes: u64,
    failures: u64,
    invocations: u64,
    total_duration: Duration,
}

impl MetricsState {
    fn snapshot(&self) -> RetryMetrics {
        let calls = self.calls.max(1) as f64;
        RetryMetrics {
            total_attempts: self.calls,
            successful_attempts: self.successes,
            failed_attempts: self.failures,
            average_attempts: if self.calls == 0 {
                0.0
            } else {
                self.invocations as f64 / calls
            },
            average_duration_ms: if self.calls == 0 {
                0.0
            } else {
                self.total_duration.as_secs_f64() * 1000.0 / calls
            },
        }
    }
}

enum RetryState {
    Attempting { attempt: u32, delay: Duration },
    Waiting { attempt: u32, delay: Duration },
}

/// Named retry strategy with its own metrics
pub struct RetryStrategy {
    name: String,
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    metrics: Mutex<MetricsState>,
}

impl std::fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryStrategy")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryStrategy {
    pub fn new(name: impl Into<String>, config: RetryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            name: name.into(),
            config,
            sleeper,
            metrics: Mutex::new(MetricsState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn metrics(&self) -> RetryMetrics {
        match self.metrics.lock() {
            Ok(state) => state.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }

    pub fn reset_metrics(&self) {
        match self.metrics.lock() {
            Ok(mut state) => *state = MetricsState::default(),
            Err(poisoned) => *poisoned.into_inner() = MetricsState::default(),
        }
    }

    fn record(&self, succeeded: bool, invocations: usize, duration: Duration) {
        let mut state = match self.metrics.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.calls += 1;
        if succeeded {
            state.successes += 1;
        } else {
            state.failures += 1;
        }
        state.invocations += invocations as u64;
        state.total_duration += duration;
    }

    /// Run `operation` under the default classification policy
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
    ) -> Result<RetrySuccess<T>, RetryFailure<E>>
    where
        E: ClassifiableError + From<AttemptTimeout>,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, |error: &E| self.config.is_retryable(error), true)
            .await
    }

    /// Run `operation`, classifying failures with `predicate` first
    ///
    /// The predicate decides alone; the default policy is not consulted.
    pub async fn execute_with<T, E, F, Fut, P>(
        &self,
        operation: F,
        predicate: P,
    ) -> Result<RetrySuccess<T>, RetryFailure<E>>
    where
        E: ClassifiableError + From<AttemptTimeout>,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.run(operation, predicate, true).await
    }

    /// Like [`execute_with`](Self::execute_with), but `attempt_timeout` is left
    /// to the operation
    ///
    /// For operations that hold per-attempt bookkeeping and must settle it
    /// when the limit fires. The operation reads the limit from
    /// [`RetryConfig::attempt_timeout`] and reports expiry as an
    /// [`AttemptTimeout`] error of its own.
    pub async fn execute_self_timed<T, E, F, Fut, P>(
        &self,
        operation: F,
        predicate: P,
    ) -> Result<RetrySuccess<T>, RetryFailure<E>>
    where
        E: ClassifiableError + From<AttemptTimeout>,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.run(operation, predicate, false).await
    }

    async fn run<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        is_retryable: P,
        enforce_timeout: bool,
    ) -> Result<RetrySuccess<T>, RetryFailure<E>>
    where
        E: ClassifiableError + From<AttemptTimeout>,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let call_started = Instant::now();
        let mut attempts: Vec<RetryAttempt> = Vec::new();
        let mut state = RetryState::Attempting {
            attempt: 1,
            delay: Duration::ZERO,
        };

        loop {
            state = match state {
                RetryState::Waiting { attempt, delay } => {
                    self.sleeper.sleep(delay).await;
                    RetryState::Attempting { attempt, delay }
                }
                RetryState::Attempting { attempt, delay } => {
                    let started_at = Instant::now();
                    let limit = self.config.attempt_timeout.filter(|_| enforce_timeout);
                    let result = match limit {
                        Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                            Ok(result) => result,
                            Err(_) => Err(E::from(AttemptTimeout { after: limit })),
                        },
                        None => operation(attempt).await,
                    };
                    let finished_at = Instant::now();

                    match result {
                        Ok(value) => {
                            attempts.push(RetryAttempt {
                                attempt_number: attempt,
                                delay,
                                error: None,
                                started_at,
                                finished_at,
                            });
                            if attempt > 1 {
                                tracing::info!(
                                    strategy = %self.name,
                                    attempt,
                                    "Operation succeeded after retry"
                                );
                            }
                            self.record(true, attempts.len(), call_started.elapsed());
                            return Ok(RetrySuccess { value, attempts });
                        }
                        Err(error) => {
                            let message = sanitize(&error.to_string());
                            attempts.push(RetryAttempt {
                                attempt_number: attempt,
                                delay,
                                error: Some(message.clone()),
                                started_at,
                                finished_at,
                            });

                            let retryable = is_retryable(&error);
                            let exhausted = attempt >= self.config.max_attempts;
                            if !retryable || exhausted {
                                tracing::warn!(
                                    strategy = %self.name,
                                    attempt,
                                    max_attempts = self.config.max_attempts,
                                    error_name = %error.name(),
                                    retryable,
                                    error = %message,
                                    "Giving up on operation"
                                );
                                self.record(false, attempts.len(), call_started.elapsed());
                                return Err(RetryFailure {
                                    error,
                                    attempts,
                                    exhausted: retryable && exhausted,
                                });
                            }

                            let next_delay = self.config.delay_with_jitter(attempt);
                            tracing::debug!(
                                strategy = %self.name,
                                attempt,
                                delay_ms = next_delay.as_millis() as u64,
                                error = %message,
                                "Retryable failure, backing off"
                            );
                            RetryState::Waiting {
                                attempt: attempt + 1,
                                delay: next_delay,
                            }
                        }
                    }
                }
            };
        }
    }
}

/// Process-scoped cache of named strategies
///
/// Lookups with the same name share one instance and therefore one set of
/// metrics. Overrides only apply when a name is first created.
pub struct RetryRegistry {
    defaults: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    strategies: DashMap<String, Arc<RetryStrategy>>,
}

impl RetryRegistry {
    pub fn new(defaults: RetryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            defaults,
            sleeper,
            strategies: DashMap::new(),
        }
    }

    pub fn defaults(&self) -> &RetryConfig {
        &self.defaults
    }

    pub fn get(&self, name: &str) -> Arc<RetryStrategy> {
        self.strategies
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(RetryStrategy::new(
                    name,
                    self.defaults.clone(),
                    Arc::clone(&self.sleeper),
                ))
            })
            .clone()
    }

    /// # Errors
    /// Fails if the merged config is invalid and `name` is not cached yet
    pub fn get_with(
        &self,
        name: &str,
        overrides: &RetryOverrides,
    ) -> Result<Arc<RetryStrategy>, &'static str> {
        if let Some(existing) = self.strategies.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        let config = overrides.merge_over(&self.defaults)?;
        Ok(self
            .strategies
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(RetryStrategy::new(name, config, Arc::clone(&self.sleeper)))
            })
            .clone())
    }

    /// Metrics of every registered strategy, sorted by name
    pub fn all_metrics(&self) -> Vec<(String, RetryMetrics)> {
        let mut all: Vec<_> = self
            .strategies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn reset_all(&self) {
        for entry in self.strategies.iter() {
            entry.value().reset_metrics();
        }
    }
}
