//! Fold an emitted chunk stream into assistant messages.
//!
//! The session publishes a generation's chunks and then needs the
//! assistant reply as logical messages for its conversation list. This is
//! the chunk-level counterpart of history reconstruction: parts grow from
//! deltas, tool calls are promoted to results, `start` opens a new message.

use super::chunk::UiChunk;
use super::message::{ChatMessage, ChatRole, MessagePart, ToolState};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct ChunkAccumulator {
    finished: Vec<ChatMessage>,
    current: Option<ChatMessage>,
    text_parts: HashMap<String, usize>,
    reasoning_parts: HashMap<String, usize>,
    tool_parts: HashMap<String, usize>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &UiChunk) {
        match chunk {
            UiChunk::Start {
                message_id,
                message_metadata,
            } => {
                self.finalize();
                let id = message_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let mut message = ChatMessage::new(id, ChatRole::Assistant);
                message.metadata = message_metadata.clone();
                self.current = Some(message);
            }

            UiChunk::TextStart { id, .. } => {
                let index = self.push_part(MessagePart::Text {
                    text: String::new(),
                });
                self.text_parts.insert(id.clone(), index);
            }
            UiChunk::TextDelta { id, delta } => {
                let index = self.text_parts.get(id).copied();
                self.append_text(index, id, delta, false);
            }

            UiChunk::ReasoningStart { id, .. } => {
                let index = self.push_part(MessagePart::Reasoning {
                    text: String::new(),
                });
                self.reasoning_parts.insert(id.clone(), index);
            }
            UiChunk::ReasoningDelta { id, delta } => {
                let index = self.reasoning_parts.get(id).copied();
                self.append_text(index, id, delta, true);
            }

            UiChunk::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
                ..
            } => {
                let index = self.push_part(MessagePart::ToolInvocation {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    state: ToolState::Call,
                    input: input.clone(),
                    output: None,
                });
                self.tool_parts.insert(tool_call_id.clone(), index);
            }
            UiChunk::ToolOutputAvailable {
                tool_call_id,
                output,
                ..
            } => {
                self.resolve_tool(tool_call_id, output.clone());
            }
            UiChunk::ToolOutputError {
                tool_call_id,
                error_text,
                ..
            } => {
                self.resolve_tool(tool_call_id, Value::String(error_text.clone()));
            }

            UiChunk::MessageMetadata { message_metadata } => {
                self.ensure_current().metadata = Some(message_metadata.clone());
            }
            UiChunk::Finish {
                message_metadata, ..
            } => {
                if let Some(message) = self.current.as_mut() {
                    if let Some(metadata) = message_metadata {
                        message.metadata = Some(metadata.clone());
                    }
                    message.content_complete = true;
                }
                self.finalize();
            }
            UiChunk::Abort { .. } | UiChunk::Error { .. } => {
                self.finalize();
            }

            // No list-level effect.
            UiChunk::StartStep
            | UiChunk::FinishStep
            | UiChunk::TextEnd { .. }
            | UiChunk::ReasoningEnd { .. }
            | UiChunk::ToolInputStart { .. }
            | UiChunk::ToolInputDelta { .. }
            | UiChunk::ToolInputError { .. }
            | UiChunk::ToolOutputDenied { .. }
            | UiChunk::ToolApprovalRequest { .. }
            | UiChunk::File { .. }
            | UiChunk::SourceUrl { .. }
            | UiChunk::SourceDocument { .. }
            | UiChunk::Data { .. } => {}
        }
    }

    /// Finalize and return every accumulated assistant message.
    pub fn into_messages(mut self) -> Vec<ChatMessage> {
        self.finalize();
        self.finished
    }

    fn ensure_current(&mut self) -> &mut ChatMessage {
        self.current.get_or_insert_with(|| {
            ChatMessage::new(Uuid::new_v4().to_string(), ChatRole::Assistant)
        })
    }

    fn push_part(&mut self, part: MessagePart) -> usize {
        let message = self.ensure_current();
        message.parts.push(part);
        message.parts.len() - 1
    }

    fn append_text(&mut self, index: Option<usize>, id: &str, delta: &str, reasoning: bool) {
        let index = match index {
            Some(index) => index,
            None => {
                // Delta without a start (orphan); open the part on demand.
                let part = if reasoning {
                    MessagePart::Reasoning {
                        text: String::new(),
                    }
                } else {
                    MessagePart::Text {
                        text: String::new(),
                    }
                };
                let index = self.push_part(part);
                if reasoning {
                    self.reasoning_parts.insert(id.to_string(), index);
                } else {
                    self.text_parts.insert(id.to_string(), index);
                }
                index
            }
        };
        if let Some(message) = self.current.as_mut() {
            match message.parts.get_mut(index) {
                Some(MessagePart::Text { text }) | Some(MessagePart::Reasoning { text }) => {
                    text.push_str(delta);
                }
                _ => {}
            }
        }
    }

    fn resolve_tool(&mut self, tool_call_id: &str, output: Value) {
        let Some(index) = self.tool_parts.get(tool_call_id).copied() else {
            return;
        };
        if let Some(message) = self.current.as_mut() {
            if let Some(MessagePart::ToolInvocation { state, output: slot, .. }) =
                message.parts.get_mut(index)
            {
                *state = ToolState::Result;
                *slot = Some(output);
            }
        }
    }

    fn finalize(&mut self) {
        if let Some(message) = self.current.take() {
            if !message.parts.is_empty() || message.metadata.is_some() {
                self.finished.push(message);
            }
        }
        self.text_parts.clear();
        self.reasoning_parts.clear();
        self.tool_parts.clear();
    }
}

/// Convenience wrapper over a whole chunk sequence.
pub fn accumulate_chunks(chunks: &[UiChunk]) -> Vec<ChatMessage> {
    let mut accumulator = ChunkAccumulator::new();
    for chunk in chunks {
        accumulator.push(chunk);
    }
    accumulator.into_messages()
}
