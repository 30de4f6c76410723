//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("respbridge={},tower_http=debug", level)
}

/// Initialize tracing subscriber for structured logging
///
/// This can only be called once per process. Subsequent calls are silently ignored.
///
/// `RUST_LOG` wins over `default_level`, which normally comes from
/// `[observability] log_level`.
///
/// # Examples
///
/// ```no_run
/// respbridge::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_scopes_crate_level() {
        assert_eq!(default_filter("warn"), "respbridge=warn,tower_http=debug");
        assert!(EnvFilter::try_new(default_filter("debug")).is_ok());
    }

    #[test]
    fn test_init_twice_is_a_no_op() {
        init("info");
        init("debug");
    }
}
