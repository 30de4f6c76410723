//! Claude Messages API wire types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// POST /v1/messages request body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    pub messages: Vec<ClaudeMessage>,
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RequestMetadata>,
}

impl MessagesRequest {
    /// Check the constraints serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.messages.is_empty() {
            return Err("messages must contain at least one message".to_string());
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }
        if let Some(t) = self.temperature
            && !(0.0..=1.0).contains(&t)
        {
            return Err(format!("temperature must be between 0.0 and 1.0, got {}", t));
        }
        if let Some(p) = self.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(format!("top_p must be between 0.0 and 1.0, got {}", p));
        }
        Ok(())
    }

    /// Thinking budget when extended thinking is enabled
    pub fn thinking_budget(&self) -> Option<u32> {
        self.thinking
            .as_ref()
            .filter(|t| t.kind == "enabled")
            .and_then(|t| t.budget_tokens)
    }
}

/// `system` may be a plain string or a list of text blocks
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    pub fn to_text(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks_to_text(blocks),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClaudeMessage {
    pub role: ClaudeRole,
    pub content: ClaudeContent,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ClaudeContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ClaudeContent {
    pub fn to_text(&self) -> String {
        match self {
            ClaudeContent::Text(text) => text.clone(),
            ClaudeContent::Blocks(blocks) => blocks_to_text(blocks),
        }
    }
}

/// Request-side content block
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: Value,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unsupported,
}

fn blocks_to_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.clone()),
            ContentBlock::ToolUse { name, input, .. } => {
                Some(format!("[tool call {}] {}", name, input))
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => Some(format!(
                "[tool result {}] {}",
                tool_use_id,
                content.as_ref().map(tool_result_text).unwrap_or_default()
            )),
            ContentBlock::Image { .. } | ContentBlock::Thinking { .. } | ContentBlock::Unsupported => {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Non-streaming response body
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ResponseBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: ClaudeUsage,
}

/// Response-side content block
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClaudeUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_string_and_block_content() {
        let req: MessagesRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-3-5-sonnet-20241022",
            "system": "be brief",
            "messages": [
                {"role": "user", "content": "Hello"},
                {"role": "assistant", "content": [{"type": "text", "text": "Hi"}]}
            ],
            "max_tokens": 50
        }))
        .expect("should parse");

        assert_eq!(req.messages[0].content.to_text(), "Hello");
        assert_eq!(req.messages[1].content.to_text(), "Hi");
        assert_eq!(req.system.map(|s| s.to_text()).as_deref(), Some("be brief"));
        assert!(!req.stream);
    }

    #[test]
    fn test_unknown_block_types_are_tolerated() {
        let content: ClaudeContent = serde_json::from_value(serde_json::json!([
            {"type": "text", "text": "see"},
            {"type": "document", "source": {}}
        ]))
        .expect("unknown block types should deserialize");
        assert_eq!(content.to_text(), "see");
    }

    #[test]
    fn test_tool_result_blocks_flatten_to_text() {
        let content: ClaudeContent = serde_json::from_value(serde_json::json!([
            {"type": "tool_result", "tool_use_id": "tu_1", "content": "42"}
        ]))
        .expect("should parse");
        assert_eq!(content.to_text(), "[tool result tu_1] 42");
    }

    #[test]
    fn test_validate_rejects_empty_messages() {
        let req: MessagesRequest = serde_json::from_value(serde_json::json!({
            "model": "m", "messages": [], "max_tokens": 10
        }))
        .expect("should parse");
        assert!(req.validate().unwrap_err().contains("messages"));
    }

    #[test]
    fn test_validate_rejects_zero_max_tokens() {
        let req: MessagesRequest = serde_json::from_value(serde_json::json!({
            "model": "m", "messages": [{"role": "user", "content": "x"}], "max_tokens": 0
        }))
        .expect("should parse");
        assert!(req.validate().unwrap_err().contains("max_tokens"));
    }

    #[test]
    fn test_thinking_budget_only_when_enabled() {
        let mut req: MessagesRequest = serde_json::from_value(serde_json::json!({
            "model": "m", "messages": [{"role": "user", "content": "x"}], "max_tokens": 10,
            "thinking": {"type": "enabled", "budget_tokens": 8000}
        }))
        .expect("should parse");
        assert_eq!(req.thinking_budget(), Some(8000));

        req.thinking = Some(ThinkingConfig {
            kind: "disabled".to_string(),
            budget_tokens: Some(8000),
        });
        assert_eq!(req.thinking_budget(), None);
    }
}
