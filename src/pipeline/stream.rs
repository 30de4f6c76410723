//! Streaming translation: backend chunks → caller SSE frames
//!
//! Translators are plain state machines producing [`SseFrame`]s, so the HTTP
//! layer only has to turn frames into axum events.
//!
//! Claude callers get `message_start`, `content_block_start`,
//! `content_block_delta`, `content_block_stop`, `message_delta` and
//! `message_stop`. OpenAI callers get `chat.completion.chunk` objects followed
//! by `data: [DONE]`.

use super::transform::{chat_usage, claude_stop_reason, claude_usage, openai_finish_reason};
use crate::formats::RequestFormat;
use crate::formats::openai::{ChatCompletionChunk, ChunkDelta, ChunkToolCall, FunctionCall};
use crate::formats::responses::{OutputItem, ResponsesChunk, ResponsesUsage};
use serde_json::{Value, json};

/// OpenAI stream terminator
pub const DONE: &str = "[DONE]";

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` line; OpenAI streams leave it unset
    pub event: Option<&'static str>,
    pub data: String,
}

impl SseFrame {
    fn named(event: &'static str, data: Value) -> Self {
        Self {
            event: Some(event),
            data: data.to_string(),
        }
    }

    fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }
}

/// What the gateway needs to know once a stream has finished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub response_id: Option<String>,
    pub usage: ResponsesUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

#[derive(Debug)]
struct OpenBlock {
    index: u32,
    kind: BlockKind,
    tool_id: Option<String>,
}

/// Shared bookkeeping for both caller formats
#[derive(Debug, Default)]
struct StreamState {
    response_id: Option<String>,
    usage: Option<ResponsesUsage>,
    saw_tool_call: bool,
    incomplete: bool,
    finished: bool,
}

impl StreamState {
    fn observe(&mut self, chunk: &ResponsesChunk) {
        if !chunk.id.is_empty() {
            self.response_id = Some(chunk.id.clone());
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        if chunk.status.as_deref() == Some("incomplete") {
            self.incomplete = true;
        }
        if chunk
            .output
            .iter()
            .any(|item| matches!(item, OutputItem::ToolCall { .. }))
        {
            self.saw_tool_call = true;
        }
    }

    fn summary(&self) -> StreamSummary {
        StreamSummary {
            response_id: self.response_id.clone(),
            usage: self.usage.unwrap_or_default(),
        }
    }
}

/// Claude Messages streaming translator
#[derive(Debug)]
pub struct ClaudeStream {
    message_id: String,
    model: String,
    started: bool,
    next_index: u32,
    open: Option<OpenBlock>,
    state: StreamState,
}

impl ClaudeStream {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            started: false,
            next_index: 0,
            open: None,
            state: StreamState::default(),
        }
    }

    fn ensure_started(&mut self, frames: &mut Vec<SseFrame>) {
        if self.started {
            return;
        }
        self.started = true;
        let input_tokens = self.state.usage.map_or(0, |u| u.prompt_tokens);
        frames.push(SseFrame::named(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": input_tokens, "output_tokens": 0}
                }
            }),
        ));
    }

    fn close_block(&mut self, frames: &mut Vec<SseFrame>) {
        if let Some(block) = self.open.take() {
            frames.push(SseFrame::named(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": block.index}),
            ));
        }
    }

    /// Open a block of `kind` unless the current one can keep receiving deltas
    fn block_for(
        &mut self,
        kind: BlockKind,
        tool: Option<(&str, &str)>,
        frames: &mut Vec<SseFrame>,
    ) -> u32 {
        let tool_id = tool.map(|(id, _)| id);
        if let Some(open) = &self.open
            && open.kind == kind
            && open.tool_id.as_deref() == tool_id
        {
            return open.index;
        }
        self.close_block(frames);

        let index = self.next_index;
        self.next_index += 1;
        let content_block = match (kind, tool) {
            (BlockKind::Text, _) => json!({"type": "text", "text": ""}),
            (BlockKind::Thinking, _) => json!({"type": "thinking", "thinking": ""}),
            (BlockKind::ToolUse, Some((id, name))) => {
                json!({"type": "tool_use", "id": id, "name": name, "input": {}})
            }
            (BlockKind::ToolUse, None) => json!({"type": "tool_use", "input": {}}),
        };
        frames.push(SseFrame::named(
            "content_block_start",
            json!({"type": "content_block_start", "index": index, "content_block": content_block}),
        ));
        self.open = Some(OpenBlock {
            index,
            kind,
            tool_id: tool_id.map(str::to_string),
        });
        index
    }

    fn delta(index: u32, delta: Value) -> SseFrame {
        SseFrame::named(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": index, "delta": delta}),
        )
    }

    pub fn push(&mut self, chunk: &ResponsesChunk) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        self.state.observe(chunk);
        self.ensure_started(&mut frames);

        for item in &chunk.output {
            match item {
                OutputItem::Text { text } if !text.is_empty() => {
                    let index = self.block_for(BlockKind::Text, None, &mut frames);
                    frames.push(Self::delta(index, json!({"type": "text_delta", "text": text})));
                }
                OutputItem::Reasoning { content } if !content.is_empty() => {
                    let index = self.block_for(BlockKind::Thinking, None, &mut frames);
                    frames.push(Self::delta(
                        index,
                        json!({"type": "thinking_delta", "thinking": content}),
                    ));
                }
                OutputItem::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    let index = self.block_for(
                        BlockKind::ToolUse,
                        Some((id.as_str(), name.as_str())),
                        &mut frames,
                    );
                    if !arguments.is_empty() {
                        frames.push(Self::delta(
                            index,
                            json!({"type": "input_json_delta", "partial_json": arguments}),
                        ));
                    }
                }
                OutputItem::Text { .. } | OutputItem::Reasoning { .. } | OutputItem::Unsupported => {}
            }
        }
        frames
    }

    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.state.finished {
            return frames;
        }
        self.ensure_started(&mut frames);
        self.close_block(&mut frames);
        let usage = claude_usage(&self.state.usage.unwrap_or_default());
        frames.push(SseFrame::named(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": claude_stop_reason(self.state.saw_tool_call, self.state.incomplete),
                    "stop_sequence": null
                },
                "usage": {"output_tokens": usage.output_tokens}
            }),
        ));
        frames.push(SseFrame::named("message_stop", json!({"type": "message_stop"})));
        self.state.finished = true;
        frames
    }

    /// Terminal error event carrying an already-mapped client response body
    pub fn error(&mut self, client_response: &Value) -> Vec<SseFrame> {
        self.state.finished = true;
        vec![SseFrame::named("error", client_response.clone())]
    }
}

/// OpenAI chat completion chunk translator
#[derive(Debug)]
pub struct OpenAiStream {
    completion_id: String,
    model: String,
    created: u64,
    role_sent: bool,
    tool_indices: Vec<String>,
    state: StreamState,
}

impl OpenAiStream {
    pub fn new(completion_id: impl Into<String>, model: impl Into<String>, created: u64) -> Self {
        Self {
            completion_id: completion_id.into(),
            model: model.into(),
            created,
            role_sent: false,
            tool_indices: Vec::new(),
            state: StreamState::default(),
        }
    }

    fn chunk_frame(chunk: &ChatCompletionChunk) -> SseFrame {
        SseFrame::data(serde_json::to_string(chunk).unwrap_or_default())
    }

    fn ensure_role(&mut self, frames: &mut Vec<SseFrame>) {
        if !self.role_sent {
            self.role_sent = true;
            frames.push(Self::chunk_frame(&ChatCompletionChunk::initial(
                &self.completion_id,
                &self.model,
                self.created,
            )));
        }
    }

    fn tool_index(&mut self, id: &str) -> u32 {
        let position = match self.tool_indices.iter().position(|known| known == id) {
            Some(position) => position,
            None => {
                self.tool_indices.push(id.to_string());
                self.tool_indices.len() - 1
            }
        };
        u32::try_from(position).unwrap_or(u32::MAX)
    }

    pub fn push(&mut self, chunk: &ResponsesChunk) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        self.state.observe(chunk);
        self.ensure_role(&mut frames);

        for item in &chunk.output {
            let delta = match item {
                OutputItem::Text { text } if !text.is_empty() => ChunkDelta {
                    content: Some(text.clone()),
                    ..ChunkDelta::default()
                },
                OutputItem::ToolCall {
                    id,
                    name,
                    arguments,
                } => ChunkDelta {
                    tool_calls: Some(vec![ChunkToolCall {
                        index: self.tool_index(id),
                        id: id.clone(),
                        kind: "function".to_string(),
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    }]),
                    ..ChunkDelta::default()
                },
                // Chat Completions has no reasoning channel.
                OutputItem::Text { .. } | OutputItem::Reasoning { .. } | OutputItem::Unsupported => {
                    continue;
                }
            };
            frames.push(Self::chunk_frame(&ChatCompletionChunk::with_delta(
                &self.completion_id,
                &self.model,
                self.created,
                delta,
            )));
        }
        frames
    }

    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.state.finished {
            return frames;
        }
        self.ensure_role(&mut frames);
        let finish = ChatCompletionChunk::finish(
            &self.completion_id,
            &self.model,
            self.created,
            openai_finish_reason(self.state.saw_tool_call, self.state.incomplete),
            self.state.usage.as_ref().map(chat_usage),
        );
        frames.push(Self::chunk_frame(&finish));
        frames.push(SseFrame::data(DONE));
        self.state.finished = true;
        frames
    }

    pub fn error(&mut self, client_response: &Value) -> Vec<SseFrame> {
        self.state.finished = true;
        vec![SseFrame::data(client_response.to_string()), SseFrame::data(DONE)]
    }
}

/// Format-dispatching translator
#[derive(Debug)]
pub enum StreamTranslator {
    Claude(ClaudeStream),
    OpenAi(OpenAiStream),
}

impl StreamTranslator {
    pub fn new(format: RequestFormat, id: &str, model: &str, created: u64) -> Self {
        match format {
            RequestFormat::Claude => StreamTranslator::Claude(ClaudeStream::new(id, model)),
            RequestFormat::OpenAi => {
                StreamTranslator::OpenAi(OpenAiStream::new(id, model, created))
            }
        }
    }

    pub fn push(&mut self, chunk: &ResponsesChunk) -> Vec<SseFrame> {
        match self {
            StreamTranslator::Claude(s) => s.push(chunk),
            StreamTranslator::OpenAi(s) => s.push(chunk),
        }
    }

    pub fn finish(&mut self) -> Vec<SseFrame> {
        match self {
            StreamTranslator::Claude(s) => s.finish(),
            StreamTranslator::OpenAi(s) => s.finish(),
        }
    }

    pub fn error(&mut self, client_response: &Value) -> Vec<SseFrame> {
        match self {
            StreamTranslator::Claude(s) => s.error(client_response),
            StreamTranslator::OpenAi(s) => s.error(client_response),
        }
    }

    pub fn summary(&self) -> StreamSummary {
        match self {
            StreamTranslator::Claude(s) => s.state.summary(),
            StreamTranslator::OpenAi(s) => s.state.summary(),
        }
    }
}
