//! Backend Responses API wire types
//!
//! [`CanonicalRequest`] is the single representation both caller formats are
//! normalized into; it serializes directly to the backend request body.

use crate::analysis::ReasoningEffort;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputRole {
    System,
    User,
    Assistant,
}

/// One entry of the canonical `input` sequence
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct InputMessage {
    pub role: InputRole,
    pub content: String,
}

impl InputMessage {
    pub fn new(role: InputRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// `reasoning` parameter; only ever built with a real effort
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReasoningParam {
    pub effort: ReasoningEffort,
}

/// Canonical backend request
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CanonicalRequest {
    pub model: String,
    pub input: Vec<InputMessage>,
    pub max_output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl CanonicalRequest {
    pub fn reasoning_effort(&self) -> Option<ReasoningEffort> {
        self.reasoning.map(|r| r.effort)
    }
}

/// One item of a backend `output` array
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Text {
        text: String,
    },
    Reasoning {
        #[serde(default)]
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResponsesUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

/// Non-streaming backend response
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResponsesResponse {
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    pub model: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: ResponsesUsage,
    /// `"completed"` or `"incomplete"` when the backend reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

fn default_object() -> String {
    "response".to_string()
}

impl ResponsesResponse {
    /// Concatenated text output
    pub fn text(&self) -> String {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.output
            .iter()
            .any(|item| matches!(item, OutputItem::ToolCall { .. }))
    }

    pub fn is_incomplete(&self) -> bool {
        self.status.as_deref() == Some("incomplete")
    }
}

/// One streamed chunk; same `output` shape with partial content
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResponsesChunk {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Backend error body, `{error: {type, message, code?, retry_after?}}`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendErrorBody {
    pub error: BackendErrorObject,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BackendErrorObject {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub retry_after: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_request_omits_absent_fields() {
        let req = CanonicalRequest {
            model: "gpt-4o".to_string(),
            input: vec![InputMessage::new(InputRole::User, "Hello")],
            max_output_tokens: 50,
            reasoning: None,
            previous_response_id: None,
            temperature: None,
            top_p: None,
            stream: false,
        };
        let json = serde_json::to_value(&req).expect("should serialize");
        assert!(json.get("reasoning").is_none(), "reasoning must be omitted");
        assert!(json.get("previous_response_id").is_none());
        assert!(json.get("stream").is_none());
        assert_eq!(json["input"][0]["role"], "user");
        assert_eq!(json["max_output_tokens"], 50);
    }

    #[test]
    fn test_canonical_request_serializes_reasoning() {
        let req = CanonicalRequest {
            model: "o3".to_string(),
            input: vec![],
            max_output_tokens: 10,
            reasoning: Some(ReasoningParam {
                effort: ReasoningEffort::High,
            }),
            previous_response_id: Some("resp_1".to_string()),
            temperature: None,
            top_p: None,
            stream: true,
        };
        let json = serde_json::to_value(&req).expect("should serialize");
        assert_eq!(json["reasoning"]["effort"], "high");
        assert_eq!(json["previous_response_id"], "resp_1");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_response_parses_mixed_output() {
        let resp: ResponsesResponse = serde_json::from_value(serde_json::json!({
            "id": "resp_1",
            "object": "response",
            "created": 1700000000,
            "model": "o3",
            "output": [
                {"type": "reasoning", "content": "thinking..."},
                {"type": "text", "text": "Hello "},
                {"type": "text", "text": "world"},
                {"type": "web_search_call", "id": "x"}
            ],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12, "reasoning_tokens": 3}
        }))
        .expect("should parse");
        assert_eq!(resp.text(), "Hello world");
        assert_eq!(resp.output.len(), 4);
        assert_eq!(resp.output[3], OutputItem::Unsupported);
        assert_eq!(resp.usage.reasoning_tokens, Some(3));
        assert!(!resp.has_tool_calls());
    }
}
