//! Caller request → canonical backend request

use crate::analysis::{
    DecisionSource, ReasoningDecision, ReasoningEffort, ReasoningEngine, decide_reasoning,
};
use crate::formats::RequestFormat;
use crate::formats::claude::{ClaudeRole, MessagesRequest};
use crate::formats::openai::{ChatCompletionRequest, ChatRole};
use crate::formats::responses::{CanonicalRequest, InputMessage, InputRole, ReasoningParam};
use serde_json::Value;

/// A validated request in the caller's own wire format
#[derive(Debug, Clone)]
pub enum CallerRequest {
    Claude(MessagesRequest),
    OpenAi(ChatCompletionRequest),
}

impl CallerRequest {
    /// Deserialize and validate `body` as `format`
    ///
    /// The error string is caller-facing and is sanitized before it leaves
    /// the gateway.
    pub fn parse(format: RequestFormat, body: Value) -> Result<Self, String> {
        match format {
            RequestFormat::Claude => {
                let request: MessagesRequest = serde_json::from_value(body)
                    .map_err(|e| format!("invalid Messages request: {}", e))?;
                request.validate()?;
                Ok(CallerRequest::Claude(request))
            }
            RequestFormat::OpenAi => {
                let request: ChatCompletionRequest = serde_json::from_value(body)
                    .map_err(|e| format!("invalid Chat Completions request: {}", e))?;
                request.validate()?;
                Ok(CallerRequest::OpenAi(request))
            }
        }
    }

    pub fn format(&self) -> RequestFormat {
        match self {
            CallerRequest::Claude(_) => RequestFormat::Claude,
            CallerRequest::OpenAi(_) => RequestFormat::OpenAi,
        }
    }

    /// Model name as the caller sent it
    pub fn model(&self) -> &str {
        match self {
            CallerRequest::Claude(r) => &r.model,
            CallerRequest::OpenAi(r) => &r.model,
        }
    }

    pub fn stream(&self) -> bool {
        match self {
            CallerRequest::Claude(r) => r.stream,
            CallerRequest::OpenAi(r) => r.stream,
        }
    }

    /// Explicit effort from `reasoning_effort` or a Claude thinking budget
    pub fn reasoning_hint(&self) -> Option<ReasoningEffort> {
        match self {
            CallerRequest::Claude(r) => r.thinking_budget().map(ReasoningEffort::from_thinking_budget),
            CallerRequest::OpenAi(r) => r.reasoning_hint(),
        }
    }

    pub fn max_output_tokens(&self) -> Option<u32> {
        match self {
            CallerRequest::Claude(r) => Some(r.max_tokens),
            CallerRequest::OpenAi(r) => r.output_token_limit(),
        }
    }

    /// Stable end-user identifier, when the caller provides one
    pub fn user_id(&self) -> Option<&str> {
        match self {
            CallerRequest::Claude(r) => r.metadata.as_ref().and_then(|m| m.user_id.as_deref()),
            CallerRequest::OpenAi(r) => r.user.as_deref(),
        }
    }

    fn sampling(&self) -> (Option<f64>, Option<f64>) {
        match self {
            CallerRequest::Claude(r) => (r.temperature, r.top_p),
            CallerRequest::OpenAi(r) => (r.temperature, r.top_p),
        }
    }

    /// Flatten the conversation into canonical input messages
    ///
    /// Tool results become user turns prefixed with `[tool result <id>]`;
    /// OpenAI `developer` messages are treated as system instructions.
    pub fn to_input(&self) -> Vec<InputMessage> {
        match self {
            CallerRequest::Claude(r) => {
                let mut input = Vec::with_capacity(r.messages.len() + 1);
                if let Some(system) = &r.system {
                    let text = system.to_text();
                    if !text.trim().is_empty() {
                        input.push(InputMessage::new(InputRole::System, text));
                    }
                }
                input.extend(r.messages.iter().map(|m| {
                    let role = match m.role {
                        ClaudeRole::User => InputRole::User,
                        ClaudeRole::Assistant => InputRole::Assistant,
                    };
                    InputMessage::new(role, m.content.to_text())
                }));
                input
            }
            CallerRequest::OpenAi(r) => r
                .messages
                .iter()
                .map(|m| match m.role {
                    ChatRole::System | ChatRole::Developer => {
                        InputMessage::new(InputRole::System, m.to_text())
                    }
                    ChatRole::User => InputMessage::new(InputRole::User, m.to_text()),
                    ChatRole::Assistant => InputMessage::new(InputRole::Assistant, m.to_text()),
                    ChatRole::Tool | ChatRole::Function => {
                        let source = m
                            .tool_call_id
                            .as_deref()
                            .or(m.name.as_deref())
                            .unwrap_or("unknown");
                        InputMessage::new(
                            InputRole::User,
                            format!("[tool result {}] {}", source, m.to_text()),
                        )
                    }
                })
                .collect(),
        }
    }
}

/// Messages the backend has not seen yet when continuing from a stored response
///
/// System instructions are always resent. If the conversation ends with an
/// assistant turn there is nothing new, so the full input is kept.
pub fn new_turns(input: &[InputMessage]) -> Vec<InputMessage> {
    let Some(last_assistant) = input.iter().rposition(|m| m.role == InputRole::Assistant) else {
        return input.to_vec();
    };
    let tail = &input[last_assistant + 1..];
    if tail.is_empty() {
        return input.to_vec();
    }
    input[..last_assistant]
        .iter()
        .filter(|m| m.role == InputRole::System)
        .chain(tail)
        .cloned()
        .collect()
}

/// Per-call knobs resolved before normalization
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Backend model after mapping and health substitution
    pub backend_model: String,
    pub previous_response_id: Option<String>,
    pub reasoning_enabled: bool,
    pub engine: ReasoningEngine,
    pub default_max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub request: CanonicalRequest,
    pub decision: ReasoningDecision,
}

/// Assemble the canonical request
///
/// Analysis always runs on the full conversation, even when only the new
/// turns are sent to the backend.
pub fn normalize(caller: &CallerRequest, options: NormalizeOptions) -> Normalized {
    let full_input = caller.to_input();

    let mut decision = decide_reasoning(&full_input, options.engine, caller.reasoning_hint());
    if !options.reasoning_enabled && decision.source != DecisionSource::Caller {
        decision.effort = None;
        decision.source = DecisionSource::Disabled;
    }

    let input = match options.previous_response_id {
        Some(_) => new_turns(&full_input),
        None => full_input,
    };
    let (temperature, top_p) = caller.sampling();

    let request = CanonicalRequest {
        model: options.backend_model,
        input,
        max_output_tokens: caller
            .max_output_tokens()
            .unwrap_or(options.default_max_output_tokens),
        reasoning: decision.effort.map(|effort| ReasoningParam { effort }),
        previous_response_id: options.previous_response_id,
        temperature,
        top_p,
        stream: caller.stream(),
    };

    Normalized { request, decision }
}
