use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a logical chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// State of a tool invocation part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolState {
    /// Input is known, output not yet.
    Call,
    /// Output (or error text) has arrived.
    Result,
}

/// One part of a logical message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolInvocation {
        tool_call_id: String,
        tool_name: String,
        state: ToolState,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
}

/// An entry in a conversation list, as hydrated into the chat UI or held by
/// the server session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Set when the content stream reached its `*-end` markers but the
    /// terminal `finish` has not necessarily been observed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub content_complete: bool,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, role: ChatRole) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
            metadata: None,
            content_complete: false,
        }
    }

    /// Convenience constructor for a plain-text user message.
    pub fn user_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Self::new(id, ChatRole::User);
        message.parts.push(MessagePart::Text { text: text.into() });
        message
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// What caused a generation to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatTrigger {
    SubmitMessage,
    RegenerateMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization_shape() {
        let message = ChatMessage::user_text("m1", "hello");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["role"], "user");
        assert_eq!(json["parts"][0]["type"], "text");
        assert_eq!(json["parts"][0]["text"], "hello");
        // Default flags stay off the wire.
        assert!(json.get("contentComplete").is_none());
    }

    #[test]
    fn test_tool_part_round_trip() {
        let part = MessagePart::ToolInvocation {
            tool_call_id: "c1".into(),
            tool_name: "search".into(),
            state: ToolState::Result,
            input: serde_json::json!({"q": "ai"}),
            output: Some(serde_json::json!({"hits": 3})),
        };
        let json = serde_json::to_string(&part).unwrap();
        let back: MessagePart = serde_json::from_str(&json).unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn test_text_helper_concatenates_parts() {
        let mut message = ChatMessage::user_text("m1", "a");
        message.parts.push(MessagePart::Text { text: "b".into() });
        assert_eq!(message.text(), "ab");
    }
}
