//! Resilience controls around backend calls: retry, circuit breaking and
//! graceful degradation

pub mod circuit_breaker;
pub mod degradation;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState, CircuitStatus,
    CircuitTransition,
};
pub use degradation::{
    DEGRADED_HEADER, DegradationConfig, DegradationManager, Fallback, ServiceLevel,
    ServiceLevelControl, input_fingerprint,
};
pub use retry::{
    AttemptTimeout, ClassifiableError, Jitter, RecordingSleeper, RetryAttempt, RetryConfig,
    RetryFailure, RetryMetrics, RetryOverrides, RetryRegistry, RetryStrategy, RetrySuccess,
    Sleeper, TokioSleeper,
};
