use crate::bus::BusError;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

// ============================================================================
// UI chunk stream type
// ============================================================================

/// Boxed stream of UI chunks, as produced by a model handler and consumed
/// by the publish codec, or emitted by the subscribe codec.
pub type BoxChunkStream = Pin<Box<dyn Stream<Item = Result<UiChunk, TransportError>> + Send>>;

// ============================================================================
// Chunk types
// ============================================================================

/// Reason a generation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Unknown,
}

/// One element of the typed stream exchanged with the UI layer.
///
/// Streaming entities (text, reasoning, tool input) are identified by a
/// logical id that ties their `*-start` / `*-delta` / `*-end` chunks
/// together. A stream ends with exactly one of `Finish`, `Error` or `Abort`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UiChunk {
    // ---- lifecycle ----
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },
    StartStep,
    FinishStep,
    Finish {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },
    Abort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        error_text: String,
    },
    MessageMetadata {
        message_metadata: Value,
    },

    // ---- streaming text ----
    TextStart {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<Value>,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },

    // ---- streaming reasoning ----
    ReasoningStart {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<Value>,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },

    // ---- tool input ----
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_executed: Option<bool>,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_executed: Option<bool>,
    },
    ToolInputError {
        tool_call_id: String,
        error_text: String,
    },

    // ---- tool result ----
    ToolOutputAvailable {
        tool_call_id: String,
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_executed: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preliminary: Option<bool>,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dynamic: Option<bool>,
    },
    ToolOutputDenied {
        tool_call_id: String,
    },
    ToolApprovalRequest {
        tool_call_id: String,
        approval_id: String,
    },

    // ---- discrete parts ----
    File {
        url: String,
        media_type: String,
    },
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    SourceDocument {
        source_id: String,
        media_type: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    // ---- open-ended data parts ----
    Data {
        name: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transient: Option<bool>,
    },
}

impl UiChunk {
    /// A bare `start` carries no payload and is synthesized on the
    /// subscribe side rather than published.
    pub fn start() -> Self {
        UiChunk::Start {
            message_id: None,
            message_metadata: None,
        }
    }

    /// True for `finish`, `error` and `abort` — the terminal set.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UiChunk::Finish { .. } | UiChunk::Error { .. } | UiChunk::Abort { .. }
        )
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("chat handler failed: {0}")]
    Handler(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}
