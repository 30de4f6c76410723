//! Command-line interface for respbridge
//!
//! Provides argument parsing and subcommand handling for the respbridge binary.

use clap::{Parser, Subcommand};

/// Claude/OpenAI compatible gateway in front of a Responses API backend
#[derive(Parser)]
#[command(name = "respbridge")]
#[command(version)]
#[command(about = "Claude/OpenAI compatible gateway for a Responses API backend")]
#[command(
    long_about = "respbridge accepts Claude Messages and OpenAI Chat Completions requests, \
    decides how much backend reasoning each one deserves, and forwards it to a Responses \
    API backend with retries, circuit breaking and graceful degradation."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# respbridge Configuration
# ========================
#
# Every section except [server] and [backend] is optional; the values shown
# below are the defaults.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

# Per backend attempt timeout in seconds (1-300)
request_timeout_seconds = 60

# ─────────────────────────────────────────────────────────────────────────────
# BACKEND
# ─────────────────────────────────────────────────────────────────────────────

[backend]
# Responses API base URL, without a trailing slash.
# Calls go to {base_url}/responses, probes to {base_url}/models.
base_url = "https://your-resource.openai.azure.com/openai/v1"

# Environment variable holding the API key (the key never goes in this file)
api_key_env = "RESPBRIDGE_API_KEY"

# "api-key" sends an `api-key` header, "bearer" sends `Authorization: Bearer`
auth_scheme = "api-key"

# Backend model used when the caller's model has no mapping
default_model = "gpt-5"

# Substituted when the mapped model is marked unavailable
# fallback_model = "gpt-5-mini"

# Background probe interval in seconds (0 disables probing)
health_check_interval_seconds = 30

# Caller model name → backend model name
[backend.model_map]
"claude-3-5-sonnet-20241022" = "gpt-5"
"gpt-4o" = "gpt-5"

# ─────────────────────────────────────────────────────────────────────────────
# REASONING
# ─────────────────────────────────────────────────────────────────────────────

[reasoning]
# When false, reasoning is only requested if the caller asks for it
enabled = true

# "weighted" scores every complexity factor, "tiered" applies fixed tiers
engine = "weighted"

# Used when the caller sends no output token limit
default_max_output_tokens = 4096

# ─────────────────────────────────────────────────────────────────────────────
# RETRY
# ─────────────────────────────────────────────────────────────────────────────

[retry]
max_attempts = 3
base_delay_ms = 500
max_delay_ms = 30000
backoff_multiplier = 2.0

# "none", "proportional" (±factor × delay) or "uniform" (0..=delay)
jitter = "proportional"
jitter_factor = 0.1

# Optional limit on a single attempt, in milliseconds
# attempt_timeout_ms = 20000

# Also retry 429 rate limit errors
retry_on_rate_limit = false

# ─────────────────────────────────────────────────────────────────────────────
# CIRCUIT BREAKER
# ─────────────────────────────────────────────────────────────────────────────

[circuit_breaker]
# Consecutive failures that open a circuit
failure_threshold = 5

# Failure rate over the sliding window that opens a circuit,
# once at least minimum_calls have been recorded
failure_rate_threshold = 0.5
minimum_calls = 10
window_size = 20

# Seconds an open circuit waits before admitting a probe call
reset_timeout_seconds = 30
half_open_max_calls = 1

# ─────────────────────────────────────────────────────────────────────────────
# CONVERSATION CONTINUITY
# ─────────────────────────────────────────────────────────────────────────────

[conversation]
# Idle conversations are forgotten after this many seconds
max_age_seconds = 3600
sweep_interval_seconds = 300
max_conversations = 10000

# ─────────────────────────────────────────────────────────────────────────────
# GRACEFUL DEGRADATION
# ─────────────────────────────────────────────────────────────────────────────

[degradation]
enabled = true

# Drop to degraded service automatically when a circuit opens.
# Restore with POST /admin/service-level/restore.
auto_degrade = true

# Successful responses cached for replay while degraded
cache_capacity = 256
cache_ttl_seconds = 300

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides it)
log_level = "info"

# "development" adds sanitized debug detail to error payloads
environment = "production"

# Prometheus metrics are always available at /metrics on the server port
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use clap::CommandFactory;
    use std::str::FromStr;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["respbridge"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["respbridge", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["respbridge", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn template_parses_and_validates() {
        let config = Config::from_str(generate_config_template())
            .expect("template should be a valid configuration");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.backend.default_model(), "gpt-5");
        assert_eq!(config.backend.map_model("gpt-4o"), "gpt-5");
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        for section in [
            "[server]",
            "[backend]",
            "[backend.model_map]",
            "[reasoning]",
            "[retry]",
            "[circuit_breaker]",
            "[conversation]",
            "[degradation]",
            "[observability]",
        ] {
            assert!(template.contains(section), "missing {}", section);
        }
    }
}
