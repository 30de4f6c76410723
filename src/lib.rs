//! respbridge - Claude/OpenAI compatible gateway for a Responses API backend
//!
//! Accepts Claude Messages and OpenAI Chat Completions requests, decides how
//! much backend reasoning each one deserves from its content, carries
//! conversation state across calls, and forwards the result to a Responses
//! backend behind retries, a circuit breaker and graceful degradation.
//! Responses and errors go back in the caller's own wire format.

pub mod analysis;
pub mod backend;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod error_mapper;
pub mod formats;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod resilience;
pub mod sanitize;
pub mod telemetry;
