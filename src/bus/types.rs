use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Well-known header keys
// ============================================================================

/// Header carrying the author role of a message (`user` or `assistant`).
pub const HEADER_ROLE: &str = "role";
/// Header tying assistant output to the user prompt that triggered it.
pub const HEADER_PROMPT_ID: &str = "promptId";
/// Header carrying a sub-event hint on a create (e.g. `tool-input-available`).
pub const HEADER_EVENT: &str = "event";

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

// ============================================================================
// Message records
// ============================================================================

/// Operation that produced a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    /// `message.create` — a new logical message.
    Create,
    /// `message.append` — partial data added to an existing logical message.
    Append,
    /// `message.update` — payload of an existing logical message replaced.
    Update,
}

/// A message as handed to `BusChannel::publish`.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub name: String,
    pub data: String,
    pub headers: HashMap<String, String>,
    /// Ephemeral messages are fanned out live but never stored, so they do
    /// not appear in history.
    pub ephemeral: bool,
}

impl OutboundMessage {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            headers: HashMap::new(),
            ephemeral: false,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }
}

/// A message as received from a subscription or a history query.
///
/// `serial` identifies the logical message: appends and updates carry the
/// serial assigned to the original create.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub name: String,
    pub data: String,
    pub action: BusAction,
    pub serial: String,
    /// Sub-event tag carried by appends and conflated updates
    /// (e.g. `text-delta`, `text-end`).
    pub event: Option<String>,
    pub headers: HashMap<String, String>,
    pub ephemeral: bool,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn role(&self) -> Option<&str> {
        self.header(HEADER_ROLE)
    }

    pub fn prompt_id(&self) -> Option<&str> {
        self.header(HEADER_PROMPT_ID)
    }

    /// Decode a JSON-valued header. Returns None for absent or malformed
    /// values; optional metadata is never fatal.
    pub fn json_header(&self, key: &str) -> Option<Value> {
        self.header(key).and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Event delivered on a channel subscription.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Message(InboundMessage),
    /// The channel entered a fatal state; no further messages will arrive.
    Failed { reason: String },
}

// ============================================================================
// History
// ============================================================================

/// Options for a history query. Results are returned newest-first.
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// When set, bound the query at the attach point of this subscription:
    /// the returned items and the subscription's live stream share a clean
    /// cut, with no overlap and no gap.
    pub until_attach: Option<u64>,
    /// Maximum number of items to return. `None` means no cap.
    pub limit: Option<usize>,
}

impl HistoryOptions {
    pub fn until_attach(subscription_id: u64) -> Self {
        Self {
            until_attach: Some(subscription_id),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Presence
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Enter,
    Leave,
}

#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub action: PresenceAction,
    pub client_id: String,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct PresenceMember {
    pub client_id: String,
    pub data: Value,
}
