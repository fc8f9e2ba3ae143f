//! History reconstruction.
//!
//! Folds a chronological batch of bus messages into the ordered list of
//! logical user/assistant messages. Used by the client to hydrate the chat
//! UI and by the server session to seed its conversation state. One user
//! message per `chat-message` event; one assistant message per contiguous
//! assistant-authored run, closed by a terminal or a role boundary.

use super::message::{ChatMessage, ChatRole, MessagePart, ToolState};
use super::wire;
use crate::bus::{InboundMessage, HEADER_EVENT};
use serde_json::Value;

/// Result of a reconstruction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    /// True when the last content-carrying message has no terminal after
    /// it — a generation is (or may still be) in flight.
    pub has_active_stream: bool,
}

/// Fold `messages` (chronological order) into logical chat messages.
///
/// Deterministic and order-preserving; appending a `finish` to the input
/// changes nothing except finalizing the trailing assistant.
pub fn reconstruct_messages(messages: &[InboundMessage]) -> ChatHistory {
    let mut builder = Builder::default();
    for message in messages {
        builder.apply(message);
    }
    builder.into_history()
}

#[derive(Default)]
struct Builder {
    out: Vec<ChatMessage>,
    open: Option<ChatMessage>,
    last_name: Option<String>,
}

impl Builder {
    fn apply(&mut self, message: &InboundMessage) {
        match wire::parse_label(&message.name) {
            wire::Label::ChatMessage => {
                self.finalize();
                match serde_json::from_str::<ChatMessage>(&message.data) {
                    Ok(user_message) => self.out.push(user_message),
                    Err(err) => log::warn!("unparseable chat-message in history: {}", err),
                }
                self.track(message);
            }
            wire::Label::Regenerate => {
                // Mirrors the server: the regenerated assistant reply is
                // removed from the list.
                self.finalize();
                if self
                    .out
                    .last()
                    .is_some_and(|m| m.role == ChatRole::Assistant)
                {
                    self.out.pop();
                }
                self.track(message);
            }
            wire::Label::Text(id) => {
                let ended = message.event.as_deref() == Some(wire::TEXT_END);
                let open = self.ensure_assistant(&message.serial);
                if open.parts.is_empty() {
                    open.id = id.to_string();
                }
                open.parts.push(MessagePart::Text {
                    text: message.data.clone(),
                });
                open.content_complete = ended;
                self.track(message);
            }
            wire::Label::Reasoning(_) => {
                let ended = message.event.as_deref() == Some(wire::REASONING_END);
                let open = self.ensure_assistant(&message.serial);
                open.parts.push(MessagePart::Reasoning {
                    text: message.data.clone(),
                });
                open.content_complete = ended;
                self.track(message);
            }
            wire::Label::Tool {
                tool_call_id,
                tool_name,
            } => {
                let ended = message.event.as_deref() == Some(wire::TOOL_INPUT_END)
                    || message.header(HEADER_EVENT) == Some(wire::TOOL_INPUT_AVAILABLE);
                let input = serde_json::from_str(&message.data)
                    .unwrap_or_else(|_| Value::String(message.data.clone()));
                let open = self.ensure_assistant(&message.serial);
                open.parts.push(MessagePart::ToolInvocation {
                    tool_call_id: tool_call_id.to_string(),
                    tool_name: tool_name.to_string(),
                    state: ToolState::Call,
                    input,
                    output: None,
                });
                open.content_complete = ended;
                self.track(message);
            }
            wire::Label::ToolOutput(tool_call_id) => {
                let body: Value = serde_json::from_str(&message.data).unwrap_or(Value::Null);
                let output = body.get("output").cloned().unwrap_or(Value::Null);
                self.resolve_tool(tool_call_id, output);
                self.track(message);
            }
            wire::Label::ToolError(tool_call_id) => {
                let body: Value = serde_json::from_str(&message.data).unwrap_or(Value::Null);
                let error_text = body
                    .get("errorText")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                self.resolve_tool(tool_call_id, Value::String(error_text.to_string()));
                self.track(message);
            }
            wire::Label::Finish | wire::Label::Error | wire::Label::Abort => {
                self.finalize();
                self.track(message);
            }
            // Lifecycle and out-of-list events contribute no parts.
            wire::Label::StepFinish
            | wire::Label::Metadata
            | wire::Label::UserAbort
            | wire::Label::Start
            | wire::Label::ToolApproval(_)
            | wire::Label::ToolDenied(_)
            | wire::Label::File
            | wire::Label::SourceUrl
            | wire::Label::SourceDocument
            | wire::Label::Data(_)
            | wire::Label::Unknown => {}
        }
    }

    fn ensure_assistant(&mut self, fallback_id: &str) -> &mut ChatMessage {
        self.open
            .get_or_insert_with(|| ChatMessage::new(fallback_id, ChatRole::Assistant))
    }

    fn resolve_tool(&mut self, tool_call_id: &str, output: Value) {
        let Some(open) = self.open.as_mut() else {
            log::debug!("tool result for '{}' with no open assistant", tool_call_id);
            return;
        };
        for part in open.parts.iter_mut() {
            if let MessagePart::ToolInvocation {
                tool_call_id: id,
                state,
                output: slot,
                ..
            } = part
            {
                if id == tool_call_id {
                    *state = ToolState::Result;
                    *slot = Some(output);
                    return;
                }
            }
        }
        log::debug!("tool result for '{}' matches no call part", tool_call_id);
    }

    fn finalize(&mut self) {
        if let Some(message) = self.open.take() {
            self.out.push(message);
        }
    }

    fn track(&mut self, message: &InboundMessage) {
        self.last_name = Some(message.name.clone());
    }

    fn into_history(mut self) -> ChatHistory {
        self.finalize();
        let has_active_stream = self
            .last_name
            .as_deref()
            .is_some_and(|name| !wire::is_terminal(name));
        ChatHistory {
            messages: self.out,
            has_active_stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusAction, HEADER_ROLE, ROLE_ASSISTANT, ROLE_USER};
    use chrono::Utc;
    use std::collections::HashMap;

    fn msg(name: &str, data: &str, event: Option<&str>, role: &str) -> InboundMessage {
        let mut headers = HashMap::new();
        headers.insert(HEADER_ROLE.to_string(), role.to_string());
        InboundMessage {
            name: name.to_string(),
            data: data.to_string(),
            action: BusAction::Create,
            serial: format!("msg-{}", name),
            event: event.map(String::from),
            headers,
            ephemeral: false,
            timestamp: Utc::now(),
        }
    }

    fn user_event(name: &str, data: &str) -> InboundMessage {
        msg(name, data, None, ROLE_USER)
    }

    fn chat_message(id: &str, text: &str) -> InboundMessage {
        let body = serde_json::to_string(&ChatMessage::user_text(id, text)).unwrap();
        user_event(wire::CHAT_MESSAGE, &body)
    }

    #[test]
    fn test_finished_conversation_reconstructs() {
        let history = reconstruct_messages(&[
            chat_message("m1", "hi"),
            msg("text:t0", "hello there", Some("text-end"), ROLE_ASSISTANT),
            msg("step-finish", "{}", None, ROLE_ASSISTANT),
            msg("finish", "{\"finishReason\":\"stop\"}", None, ROLE_ASSISTANT),
        ]);

        assert!(!history.has_active_stream);
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[0].id, "m1");
        assert_eq!(history.messages[0].role, ChatRole::User);
        // The assistant adopts the first text id as its message id.
        assert_eq!(history.messages[1].id, "t0");
        assert_eq!(history.messages[1].text(), "hello there");
        assert!(history.messages[1].content_complete);
    }

    #[test]
    fn test_mid_stream_history_is_active() {
        let history = reconstruct_messages(&[
            chat_message("m1", "hi"),
            msg("text:t0", "partial answ", None, ROLE_ASSISTANT),
        ]);

        assert!(history.has_active_stream);
        assert_eq!(history.messages.len(), 2);
        assert!(!history.messages[1].content_complete);
    }

    #[test]
    fn test_content_complete_without_finish() {
        let history = reconstruct_messages(&[
            chat_message("m1", "hi"),
            msg("text:t0", "done", Some("text-end"), ROLE_ASSISTANT),
        ]);
        // Content ended but the terminal has not arrived yet.
        assert!(history.has_active_stream);
        assert!(history.messages[1].content_complete);
    }

    #[test]
    fn test_regenerate_removes_trailing_assistant() {
        let history = reconstruct_messages(&[
            chat_message("m1", "hi"),
            msg("text:t0", "first answer", Some("text-end"), ROLE_ASSISTANT),
            msg("finish", "{\"finishReason\":\"stop\"}", None, ROLE_ASSISTANT),
            user_event(wire::REGENERATE, "{}"),
            msg("text:t1", "second answer", Some("text-end"), ROLE_ASSISTANT),
            msg("finish", "{\"finishReason\":\"stop\"}", None, ROLE_ASSISTANT),
        ]);

        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[1].text(), "second answer");
    }

    #[test]
    fn test_tool_call_promoted_to_result() {
        let history = reconstruct_messages(&[
            chat_message("m1", "search for ai"),
            msg("tool:c1:search", "{\"q\":\"ai\"}", Some("tool-input-end"), ROLE_ASSISTANT),
            msg("tool-output:c1", "{\"output\":{\"hits\":3}}", None, ROLE_ASSISTANT),
            msg("finish", "{\"finishReason\":\"stop\"}", None, ROLE_ASSISTANT),
        ]);

        let parts = &history.messages[1].parts;
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            MessagePart::ToolInvocation { state, output, .. } => {
                assert_eq!(*state, ToolState::Result);
                assert_eq!(output.as_ref().unwrap()["hits"], 3);
            }
            other => panic!("expected tool part, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_error_resolves_with_error_text() {
        let history = reconstruct_messages(&[
            chat_message("m1", "go"),
            msg("tool:c1:fetch", "{}", Some("tool-input-end"), ROLE_ASSISTANT),
            msg("tool-error:c1", "{\"errorText\":\"timeout\"}", None, ROLE_ASSISTANT),
        ]);

        match &history.messages[1].parts[0] {
            MessagePart::ToolInvocation { state, output, .. } => {
                assert_eq!(*state, ToolState::Result);
                assert_eq!(output.as_ref().unwrap(), "timeout");
            }
            other => panic!("expected tool part, got {:?}", other),
        }
    }

    #[test]
    fn test_appending_finish_only_finalizes() {
        let base = vec![
            chat_message("m1", "hi"),
            msg("text:t0", "answer", Some("text-end"), ROLE_ASSISTANT),
        ];
        let mut extended = base.clone();
        extended.push(msg(
            "finish",
            "{\"finishReason\":\"stop\"}",
            None,
            ROLE_ASSISTANT,
        ));

        let open = reconstruct_messages(&base);
        let closed = reconstruct_messages(&extended);

        assert_eq!(open.messages, closed.messages);
        assert!(open.has_active_stream);
        assert!(!closed.has_active_stream);
    }

    #[test]
    fn test_empty_history_is_inactive() {
        let history = reconstruct_messages(&[]);
        assert!(history.messages.is_empty());
        assert!(!history.has_active_stream);
    }

    #[test]
    fn test_skip_set_does_not_affect_activity() {
        let history = reconstruct_messages(&[
            chat_message("m1", "hi"),
            msg("text:t0", "answer", Some("text-end"), ROLE_ASSISTANT),
            msg("finish", "{\"finishReason\":\"stop\"}", None, ROLE_ASSISTANT),
            user_event(wire::USER_ABORT, "{}"),
            msg("metadata", "{}", None, ROLE_ASSISTANT),
        ]);
        assert!(!history.has_active_stream);
    }
}
