//! Wire vocabulary: the message names and sub-event tags the codec speaks.
//!
//! Streaming entities use prefixed names carrying the logical id
//! (`text:<id>`, `reasoning:<id>`, `tool:<id>:<name>`); control events use
//! bare names (`start`, `step-finish`, `finish`, ...). Tool results replace
//! the tool message under a `tool-output:<id>` / `tool-error:<id>` /
//! `tool-denied:<id>` name.

// ---- control names ----
pub const START: &str = "start";
pub const STEP_FINISH: &str = "step-finish";
pub const FINISH: &str = "finish";
pub const ERROR: &str = "error";
pub const ABORT: &str = "abort";
pub const METADATA: &str = "metadata";
pub const FILE: &str = "file";
pub const SOURCE_URL: &str = "source-url";
pub const SOURCE_DOCUMENT: &str = "source-document";

// ---- streaming name prefixes ----
pub const TEXT_PREFIX: &str = "text:";
pub const REASONING_PREFIX: &str = "reasoning:";
pub const TOOL_PREFIX: &str = "tool:";
pub const TOOL_OUTPUT_PREFIX: &str = "tool-output:";
pub const TOOL_ERROR_PREFIX: &str = "tool-error:";
pub const TOOL_DENIED_PREFIX: &str = "tool-denied:";
pub const TOOL_APPROVAL_PREFIX: &str = "tool-approval:";
pub const DATA_PREFIX: &str = "data-";

// ---- client-published names ----
pub const CHAT_MESSAGE: &str = "chat-message";
pub const REGENERATE: &str = "regenerate";
pub const USER_ABORT: &str = "user-abort";

// ---- append/update sub-events ----
pub const TEXT_DELTA: &str = "text-delta";
pub const TEXT_END: &str = "text-end";
pub const REASONING_DELTA: &str = "reasoning-delta";
pub const REASONING_END: &str = "reasoning-end";
pub const TOOL_INPUT_DELTA: &str = "tool-input-delta";
pub const TOOL_INPUT_END: &str = "tool-input-end";
/// Header event hint on a non-streaming tool create.
pub const TOOL_INPUT_AVAILABLE: &str = "tool-input-available";

/// Names the client publishes on the shared channel; the subscribe side
/// filters them out as echoes of its own writes.
pub fn is_client_event(name: &str) -> bool {
    matches!(name, CHAT_MESSAGE | REGENERATE | USER_ABORT)
}

/// Names that terminate a stream.
pub fn is_terminal(name: &str) -> bool {
    matches!(name, FINISH | ERROR | ABORT)
}

pub fn text_label(id: &str) -> String {
    format!("{}{}", TEXT_PREFIX, id)
}

pub fn reasoning_label(id: &str) -> String {
    format!("{}{}", REASONING_PREFIX, id)
}

pub fn tool_label(tool_call_id: &str, tool_name: &str) -> String {
    format!("{}{}:{}", TOOL_PREFIX, tool_call_id, tool_name)
}

pub fn tool_output_label(tool_call_id: &str) -> String {
    format!("{}{}", TOOL_OUTPUT_PREFIX, tool_call_id)
}

pub fn tool_error_label(tool_call_id: &str) -> String {
    format!("{}{}", TOOL_ERROR_PREFIX, tool_call_id)
}

pub fn tool_denied_label(tool_call_id: &str) -> String {
    format!("{}{}", TOOL_DENIED_PREFIX, tool_call_id)
}

pub fn tool_approval_label(tool_call_id: &str) -> String {
    format!("{}{}", TOOL_APPROVAL_PREFIX, tool_call_id)
}

pub fn data_label(name: &str) -> String {
    format!("{}{}", DATA_PREFIX, name)
}

/// Parsed message name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label<'a> {
    Text(&'a str),
    Reasoning(&'a str),
    /// `tool:<id>:<name>`; the tool name may itself contain `:`, so only
    /// the first two separators are significant.
    Tool {
        tool_call_id: &'a str,
        tool_name: &'a str,
    },
    ToolOutput(&'a str),
    ToolError(&'a str),
    ToolDenied(&'a str),
    ToolApproval(&'a str),
    Data(&'a str),
    Start,
    StepFinish,
    Finish,
    Error,
    Abort,
    Metadata,
    File,
    SourceUrl,
    SourceDocument,
    ChatMessage,
    Regenerate,
    UserAbort,
    Unknown,
}

pub fn parse_label(name: &str) -> Label<'_> {
    match name {
        START => return Label::Start,
        STEP_FINISH => return Label::StepFinish,
        FINISH => return Label::Finish,
        ERROR => return Label::Error,
        ABORT => return Label::Abort,
        METADATA => return Label::Metadata,
        FILE => return Label::File,
        SOURCE_URL => return Label::SourceUrl,
        SOURCE_DOCUMENT => return Label::SourceDocument,
        CHAT_MESSAGE => return Label::ChatMessage,
        REGENERATE => return Label::Regenerate,
        USER_ABORT => return Label::UserAbort,
        _ => {}
    }

    if let Some(id) = name.strip_prefix(TEXT_PREFIX) {
        Label::Text(id)
    } else if let Some(id) = name.strip_prefix(REASONING_PREFIX) {
        Label::Reasoning(id)
    } else if let Some(id) = name.strip_prefix(TOOL_OUTPUT_PREFIX) {
        Label::ToolOutput(id)
    } else if let Some(id) = name.strip_prefix(TOOL_ERROR_PREFIX) {
        Label::ToolError(id)
    } else if let Some(id) = name.strip_prefix(TOOL_DENIED_PREFIX) {
        Label::ToolDenied(id)
    } else if let Some(id) = name.strip_prefix(TOOL_APPROVAL_PREFIX) {
        Label::ToolApproval(id)
    } else if let Some(rest) = name.strip_prefix(TOOL_PREFIX) {
        match rest.split_once(':') {
            Some((tool_call_id, tool_name)) => Label::Tool {
                tool_call_id,
                tool_name,
            },
            None => Label::Unknown,
        }
    } else if let Some(data_name) = name.strip_prefix(DATA_PREFIX) {
        Label::Data(data_name)
    } else {
        Label::Unknown
    }
}
