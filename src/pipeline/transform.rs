//! Canonical backend response → caller wire format

use crate::formats::claude::{ClaudeUsage, MessagesResponse, ResponseBlock};
use crate::formats::openai::{
    AssistantMessage, ChatCompletion, ChatUsage, Choice, CompletionTokensDetails, FunctionCall,
    OBJECT_CHAT_COMPLETION, ToolCall,
};
use crate::formats::responses::{OutputItem, ResponsesResponse, ResponsesUsage};
use serde_json::Value;

/// Tool arguments are JSON text on the backend and a JSON object for Claude;
/// unparseable arguments are passed through as a string.
pub(crate) fn tool_input(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

pub(crate) fn claude_stop_reason(has_tool_calls: bool, incomplete: bool) -> &'static str {
    if has_tool_calls {
        "tool_use"
    } else if incomplete {
        "max_tokens"
    } else {
        "end_turn"
    }
}

pub(crate) fn openai_finish_reason(has_tool_calls: bool, incomplete: bool) -> &'static str {
    if has_tool_calls {
        "tool_calls"
    } else if incomplete {
        "length"
    } else {
        "stop"
    }
}

pub(crate) fn claude_usage(usage: &ResponsesUsage) -> ClaudeUsage {
    ClaudeUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    }
}

pub(crate) fn chat_usage(usage: &ResponsesUsage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        completion_tokens_details: usage
            .reasoning_tokens
            .map(|reasoning_tokens| CompletionTokensDetails { reasoning_tokens }),
    }
}

/// Claude Messages response; `model` is echoed back as the caller sent it
pub fn to_claude(response: &ResponsesResponse, model: &str) -> MessagesResponse {
    let content = response
        .output
        .iter()
        .filter_map(|item| match item {
            OutputItem::Text { text } => Some(ResponseBlock::Text { text: text.clone() }),
            OutputItem::Reasoning { content } if !content.is_empty() => {
                Some(ResponseBlock::Thinking {
                    thinking: content.clone(),
                })
            }
            OutputItem::ToolCall {
                id,
                name,
                arguments,
            } => Some(ResponseBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: tool_input(arguments),
            }),
            OutputItem::Reasoning { .. } | OutputItem::Unsupported => None,
        })
        .collect();

    MessagesResponse {
        id: response.id.clone(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(
            claude_stop_reason(response.has_tool_calls(), response.is_incomplete()).to_string(),
        ),
        stop_sequence: None,
        usage: claude_usage(&response.usage),
    }
}

/// OpenAI Chat Completion; reasoning output is reported only as a token count
pub fn to_openai(response: &ResponsesResponse, model: &str) -> ChatCompletion {
    let tool_calls: Vec<ToolCall> = response
        .output
        .iter()
        .filter_map(|item| match item {
            OutputItem::ToolCall {
                id,
                name,
                arguments,
            } => Some(ToolCall {
                id: id.clone(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }),
            _ => None,
        })
        .collect();

    let text = response.text();
    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };
    let finish_reason = openai_finish_reason(!tool_calls.is_empty(), response.is_incomplete());

    ChatCompletion {
        id: response.id.clone(),
        object: OBJECT_CHAT_COMPLETION.to_string(),
        created: response.created,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: chat_usage(&response.usage),
    }
}
