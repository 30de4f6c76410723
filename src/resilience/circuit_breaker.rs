//! Per-key circuit breaker
//!
//! Each key (one per backend model, e.g. `responses:gpt-5`) owns an
//! independent state machine:
//! - `closed`: calls pass, outcomes fill a sliding window
//! - `open`: calls are rejected without touching the backend
//! - `half-open`: after `reset_timeout`, up to `half_open_max_calls` probes pass
//!
//! A closed circuit trips when consecutive failures reach
//! `failure_threshold`, or when the window holds at least `minimum_calls`
//! outcomes and the failure rate reaches `failure_rate_threshold`. Transitions
//! for one key happen under that key's map entry, so they are serialized.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_FAILURE_RATE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MINIMUM_CALLS: u32 = 10;
pub const DEFAULT_WINDOW_SIZE: usize = 20;
pub const DEFAULT_RESET_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Read side of the breaker as seen by the degradation manager
pub trait CircuitStatus: Send + Sync {
    fn is_open(&self, key: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    failure_rate_threshold: f64,
    minimum_calls: u32,
    window_size: usize,
    reset_timeout: Duration,
    half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// # Errors
    /// Returns an error for zero thresholds, a rate outside `(0, 1]`, or a
    /// window smaller than `minimum_calls`
    pub fn new(
        failure_threshold: u32,
        failure_rate_threshold: f64,
        minimum_calls: u32,
        window_size: usize,
        reset_timeout: Duration,
        half_open_max_calls: u32,
    ) -> Result<Self, &'static str> {
        if failure_threshold == 0 {
            return Err("failure_threshold must be at least 1");
        }
        if !(failure_rate_threshold > 0.0 && failure_rate_threshold <= 1.0) {
            return Err("failure_rate_threshold must be in (0.0, 1.0]");
        }
        if window_size == 0 {
            return Err("window_size must be at least 1");
        }
        if (minimum_calls as usize) > window_size {
            return Err("minimum_calls must not exceed window_size");
        }
        if half_open_max_calls == 0 {
            return Err("half_open_max_calls must be at least 1");
        }
        Ok(Self {
            failure_threshold,
            failure_rate_threshold,
            minimum_calls,
            window_size,
            reset_timeout,
            half_open_max_calls,
        })
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn failure_rate_threshold(&self) -> f64 {
        self.failure_rate_threshold
    }

    pub fn minimum_calls(&self) -> u32 {
        self.minimum_calls
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    pub fn half_open_max_calls(&self) -> u32 {
        self.half_open_max_calls
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_FAILURE_RATE_THRESHOLD,
            DEFAULT_MINIMUM_CALLS,
            DEFAULT_WINDOW_SIZE,
            Duration::from_secs(DEFAULT_RESET_TIMEOUT_SECS),
            DEFAULT_HALF_OPEN_MAX_CALLS,
        )
        .expect("default CircuitBreakerConfig values must be valid")
    }
}

/// A state change, returned so callers can count and log it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitTransition {
    pub key: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Call rejected because the circuit is open
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CircuitBreakerError: circuit {key} is open")]
pub struct CircuitOpen {
    pub key: String,
    /// Time left before a probe is allowed
    pub remaining: Duration,
}

/// Point-in-time view of one circuit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub window_calls: usize,
    pub failure_rate: f64,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    window: VecDeque<bool>,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_since: Option<Instant>,
    half_open_in_flight: u32,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            consecutive_failures: 0,
            opened_at: None,
            half_open_since: None,
            half_open_in_flight: 0,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.window.len() as f64
    }

    fn push(&mut self, success: bool, window_size: usize) {
        self.window.push_back(success);
        while self.window.len() > window_size {
            self.window.pop_front();
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_since = None;
        self.half_open_in_flight = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.window.clear();
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.half_open_since = None;
        self.half_open_in_flight = 0;
    }
}

/// Circuit breaker registry keyed by backend/operation
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, Circuit>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn try_acquire(&self, key: &str) -> Result<Option<CircuitTransition>, CircuitOpen> {
        self.try_acquire_at(key, Instant::now())
    }

    /// Ask permission to issue a call
    ///
    /// Moves an open circuit to half-open once `reset_timeout` has elapsed.
    /// A half-open circuit whose probes never reported back (cancelled calls)
    /// re-admits probes after another `reset_timeout`.
    pub fn try_acquire_at(
        &self,
        key: &str,
        now: Instant,
    ) -> Result<Option<CircuitTransition>, CircuitOpen> {
        let mut circuit = self
            .circuits
            .entry(key.to_string())
            .or_insert_with(Circuit::new);
        let reset_timeout = self.config.reset_timeout;

        match circuit.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                let opened_at = circuit.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed < reset_timeout {
                    return Err(CircuitOpen {
                        key: key.to_string(),
                        remaining: reset_timeout - elapsed,
                    });
                }
                circuit.state = CircuitState::HalfOpen;
                circuit.half_open_since = Some(now);
                circuit.half_open_in_flight = 1;
                tracing::info!(
                    circuit = %key,
                    "Circuit half-open, admitting probe call"
                );
                Ok(Some(CircuitTransition {
                    key: key.to_string(),
                    from: CircuitState::Open,
                    to: CircuitState::HalfOpen,
                }))
            }
            CircuitState::HalfOpen => {
                let stale = circuit
                    .half_open_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= reset_timeout);
                if stale {
                    circuit.half_open_since = Some(now);
                    circuit.half_open_in_flight = 0;
                }
                if circuit.half_open_in_flight < self.config.half_open_max_calls {
                    circuit.half_open_in_flight += 1;
                    Ok(None)
                } else {
                    Err(CircuitOpen {
                        key: key.to_string(),
                        remaining: Duration::ZERO,
                    })
                }
            }
        }
    }

    pub fn record_success(&self, key: &str) -> Option<CircuitTransition> {
        self.record_success_at(key, Instant::now())
    }

    pub fn record_success_at(&self, key: &str, _now: Instant) -> Option<CircuitTransition> {
        let mut circuit = self
            .circuits
            .entry(key.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.close();
                tracing::info!(circuit = %key, "Circuit closed after successful probe");
                Some(CircuitTransition {
                    key: key.to_string(),
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
                circuit.push(true, self.config.window_size);
                None
            }
            // Late success from a call admitted before the circuit opened
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(&self, key: &str) -> Option<CircuitTransition> {
        self.record_failure_at(key, Instant::now())
    }

    pub fn record_failure_at(&self, key: &str, now: Instant) -> Option<CircuitTransition> {
        let mut circuit = self
            .circuits
            .entry(key.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.open(now);
                tracing::warn!(circuit = %key, "Probe failed, circuit re-opened");
                Some(CircuitTransition {
                    key: key.to_string(),
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            CircuitState::Closed => {
                circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
                circuit.push(false, self.config.window_size);

                let by_count = circuit.consecutive_failures >= self.config.failure_threshold;
                let by_rate = circuit.window.len() >= self.config.minimum_calls as usize
                    && circuit.failure_rate() >= self.config.failure_rate_threshold;
                if !(by_count || by_rate) {
                    tracing::debug!(
                        circuit = %key,
                        consecutive_failures = circuit.consecutive_failures,
                        failure_rate = circuit.failure_rate(),
                        "Circuit failure recorded (still closed)"
                    );
                    return None;
                }

                tracing::warn!(
                    circuit = %key,
                    consecutive_failures = circuit.consecutive_failures,
                    failure_rate = circuit.failure_rate(),
                    reset_timeout_secs = self.config.reset_timeout.as_secs(),
                    "Circuit opened"
                );
                circuit.open(now);
                Some(CircuitTransition {
                    key: key.to_string(),
                    from: CircuitState::Closed,
                    to: CircuitState::Open,
                })
            }
            CircuitState::Open => None,
        }
    }

    /// Give back an admission without reporting an outcome
    ///
    /// Used when the caller went away mid-call. Only a half-open slot is
    /// returned; failure counts and the window are untouched.
    pub fn release(&self, key: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(key)
            && circuit.state == CircuitState::HalfOpen
        {
            circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
            tracing::debug!(circuit = %key, "Half-open slot released without outcome");
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        self.circuits
            .get(key)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, key: &str) -> Option<CircuitSnapshot> {
        self.circuits.get(key).map(|c| CircuitSnapshot {
            key: key.to_string(),
            state: c.state,
            consecutive_failures: c.consecutive_failures,
            window_calls: c.window.len(),
            failure_rate: c.failure_rate(),
        })
    }

    /// Keys of circuits currently open or half-open, sorted
    pub fn open_circuits(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .circuits
            .iter()
            .filter(|entry| entry.state != CircuitState::Closed)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl CircuitStatus for CircuitBreaker {
    fn is_open(&self, key: &str) -> bool {
        self.state(key) == CircuitState::Open
    }
}
