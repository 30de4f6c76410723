//! Caller wire-format detection
//!
//! Detection never fails a request: it works on an already-parsed
//! `serde_json::Value`, treats every shape mismatch as "no signal" and falls
//! back to Claude.

use super::RequestFormat;
use axum::http::HeaderMap;
use serde_json::Value;

/// Which rule produced the detected format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSignal {
    /// A Claude-only field, block type, or header was present
    Claude,
    /// An OpenAI-only field, tool schema, or role was present
    OpenAi,
    /// Nothing conclusive; the default applied
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub format: RequestFormat,
    pub signal: DetectionSignal,
}

impl Detection {
    /// Resolve the format, letting the route decide when nothing was conclusive
    pub fn resolve(self, route_default: RequestFormat) -> RequestFormat {
        match self.signal {
            DetectionSignal::Default => route_default,
            DetectionSignal::Claude | DetectionSignal::OpenAi => self.format,
        }
    }
}

const CLAUDE_ONLY_BLOCKS: &[&str] = &[
    "tool_use",
    "tool_result",
    "thinking",
    "redacted_thinking",
    "document",
];

/// Classify a request body as Claude or OpenAI
///
/// Priority: Claude signals, then OpenAI signals, then the Claude default.
pub fn detect_format(body: &Value, headers: &HeaderMap) -> Detection {
    if has_claude_signal(body, headers) {
        return Detection {
            format: RequestFormat::Claude,
            signal: DetectionSignal::Claude,
        };
    }
    if has_openai_signal(body) {
        return Detection {
            format: RequestFormat::OpenAi,
            signal: DetectionSignal::OpenAi,
        };
    }
    Detection {
        format: RequestFormat::Claude,
        signal: DetectionSignal::Default,
    }
}

fn has_claude_signal(body: &Value, headers: &HeaderMap) -> bool {
    if headers.contains_key("anthropic-version") || body.get("anthropic_version").is_some() {
        return true;
    }
    if body.get("system").is_some_and(Value::is_string) {
        return true;
    }
    if body.get("thinking").is_some_and(Value::is_object) {
        return true;
    }
    messages(body).any(|message| {
        message
            .get("content")
            .and_then(Value::as_array)
            .is_some_and(|blocks| blocks.iter().any(is_claude_block))
    })
}

fn is_claude_block(block: &Value) -> bool {
    match block.get("type").and_then(Value::as_str) {
        Some("image") => block.get("source").is_some(),
        Some(kind) => CLAUDE_ONLY_BLOCKS.contains(&kind),
        None => false,
    }
}

fn has_openai_signal(body: &Value) -> bool {
    if body.get("max_completion_tokens").is_some()
        || body.get("functions").is_some()
        || body.get("reasoning_effort").is_some()
    {
        return true;
    }
    let function_tools = body
        .get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| {
            tools.iter().any(|tool| {
                tool.get("function").is_some()
                    || tool.get("type").and_then(Value::as_str) == Some("function")
            })
        });
    if function_tools {
        return true;
    }
    messages(body).any(|message| {
        matches!(
            message.get("role").and_then(Value::as_str),
            Some("tool" | "function" | "system" | "developer")
        )
    })
}

fn messages(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}
