//! Graceful degradation
//!
//! Tracks an overall service level next to the circuit breaker. The two only
//! talk through [`CircuitStatus`] and [`ServiceLevelControl`], so either can be
//! replaced with a fake in tests.
//!
//! While degraded, non-streaming calls are answered from a bounded TTL cache
//! of earlier successful responses, or with a `graceful_degradation` payload
//! when nothing is cached. Both are returned as HTTP 200.

use super::circuit_breaker::CircuitStatus;
use crate::formats::RequestFormat;
use crate::formats::responses::InputMessage;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Response header set on answers served from the fallback cache
pub const DEGRADED_HEADER: &str = "x-respbridge-degraded";
pub const DEGRADED_MESSAGE: &str =
    "The service is temporarily operating in degraded mode. Please retry shortly.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceLevel {
    Full,
    Degraded,
}

impl ServiceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceLevel::Full => "full",
            ServiceLevel::Degraded => "degraded",
        }
    }
}

/// Write side of the degradation manager as seen by the request path
pub trait ServiceLevelControl: Send + Sync {
    /// Report a failed backend call for `key`; returns `true` if the service
    /// level dropped as a result
    fn on_failure(&self, key: &str, circuits: &dyn CircuitStatus) -> bool;

    fn current_service_level(&self) -> ServiceLevel;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DegradationConfig {
    pub enabled: bool,
    pub auto_degrade: bool,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_degrade: true,
            cache_capacity: 256,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedResponse {
    body: Value,
    stored_at: Instant,
}

/// What to send while degraded
#[derive(Debug, Clone, PartialEq)]
pub enum Fallback {
    /// A cached successful response for the same input
    Cached(Value),
    /// The format-specific `graceful_degradation` payload
    Notice(Value),
}

pub struct DegradationManager {
    config: DegradationConfig,
    degraded: AtomicBool,
    cache: DashMap<String, CachedResponse>,
}

impl DegradationManager {
    pub fn new(config: DegradationConfig) -> Self {
        Self {
            config,
            degraded: AtomicBool::new(false),
            cache: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DegradationConfig {
        &self.config
    }

    /// Whether calls should be answered with a fallback instead of the backend
    pub fn should_serve_fallback(&self) -> bool {
        self.config.enabled && self.current_service_level() == ServiceLevel::Degraded
    }

    /// Lower the service level; returns `true` on transition
    pub fn degrade(&self, reason: &str) -> bool {
        let changed = !self.degraded.swap(true, Ordering::SeqCst);
        if changed {
            tracing::warn!(reason = %reason, "Service level lowered to degraded");
        }
        changed
    }

    /// Manually restore full service; returns `true` on transition
    pub fn restore(&self) -> bool {
        let changed = self.degraded.swap(false, Ordering::SeqCst);
        if changed {
            tracing::info!("Service level restored to full");
        }
        changed
    }

    pub fn store(&self, format: RequestFormat, fingerprint: &str, body: Value) {
        self.store_at(format, fingerprint, body, Instant::now());
    }

    /// Cache a successful response, evicting the oldest entry when full
    pub fn store_at(&self, format: RequestFormat, fingerprint: &str, body: Value, now: Instant) {
        if !self.config.enabled || self.config.cache_capacity == 0 {
            return;
        }
        self.cache.insert(
            cache_key(format, fingerprint),
            CachedResponse {
                body,
                stored_at: now,
            },
        );
        while self.cache.len() > self.config.cache_capacity {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.cache.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn cached_at(&self, format: RequestFormat, fingerprint: &str, now: Instant) -> Option<Value> {
        let key = cache_key(format, fingerprint);
        let fresh = {
            let entry = self.cache.get(&key)?;
            (now.saturating_duration_since(entry.stored_at) <= self.config.cache_ttl)
                .then(|| entry.body.clone())
        };
        if fresh.is_none() {
            self.cache.remove(&key);
        }
        fresh
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn fallback(&self, format: RequestFormat, fingerprint: &str) -> Fallback {
        self.fallback_at(format, fingerprint, Instant::now())
    }

    pub fn fallback_at(&self, format: RequestFormat, fingerprint: &str, now: Instant) -> Fallback {
        match self.cached_at(format, fingerprint, now) {
            Some(body) => Fallback::Cached(body),
            None => Fallback::Notice(degradation_payload(format, DEGRADED_MESSAGE)),
        }
    }
}

impl ServiceLevelControl for DegradationManager {
    fn on_failure(&self, key: &str, circuits: &dyn CircuitStatus) -> bool {
        if !(self.config.enabled && self.config.auto_degrade) {
            return false;
        }
        if circuits.is_open(key) {
            return self.degrade(&format!("circuit {} is open", key));
        }
        false
    }

    fn current_service_level(&self) -> ServiceLevel {
        if self.degraded.load(Ordering::SeqCst) {
            ServiceLevel::Degraded
        } else {
            ServiceLevel::Full
        }
    }
}

fn cache_key(format: RequestFormat, fingerprint: &str) -> String {
    format!("{}:{}", format.as_str(), fingerprint)
}

/// SHA-256 over model and canonical input, hex encoded
pub fn input_fingerprint(model: &str, input: &[InputMessage]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    for message in input {
        hasher.update([0u8]);
        hasher.update(format!("{:?}", message.role).as_bytes());
        hasher.update([0u8]);
        hasher.update(message.content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Error-shaped body returned with status 200 while degraded
pub fn degradation_payload(format: RequestFormat, message: &str) -> Value {
    match format {
        RequestFormat::Claude => json!({
            "type": "error",
            "error": {"type": "graceful_degradation", "message": message}
        }),
        RequestFormat::OpenAi => json!({
            "error": {
                "message": message,
                "type": "graceful_degradation",
                "code": "service_degraded"
            }
        }),
    }
}
