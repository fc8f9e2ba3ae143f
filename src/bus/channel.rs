use super::types::{
    BusEvent, HistoryOptions, InboundMessage, OutboundMessage, PresenceEvent, PresenceMember,
};
use serde_json::Value;
use tokio::sync::mpsc;

/// Bus error types
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("channel failed: {0}")]
    ChannelFailed(String),

    #[error("unknown serial: {0}")]
    UnknownSerial(String),

    #[error("bus write rejected: {0}")]
    WriteRejected(String),

    #[error("subscription closed")]
    SubscriptionClosed,
}

/// A live attachment to a channel.
///
/// Messages published after the attach point are delivered on `events` in
/// bus order. The receiver buffers, so a consumer may defer reading (e.g.
/// while a history query is in flight) without losing messages.
pub struct Subscription {
    pub id: u64,
    pub events: mpsc::UnboundedReceiver<BusEvent>,
}

/// One ordered pub/sub channel: message create / append / update, history
/// bounded at the attach point, and presence.
///
/// Implementations must deliver messages to every subscriber in a single
/// total order per channel; the chunk codec relies on nothing else.
#[async_trait::async_trait]
pub trait BusChannel: Send + Sync {
    /// Create a new logical message. Resolves with the server-assigned
    /// serial, which subsequent appends and updates must reference.
    async fn publish(&self, message: OutboundMessage) -> Result<String, BusError>;

    /// Append partial data to an existing logical message.
    async fn append(
        &self,
        serial: &str,
        data: String,
        event: Option<String>,
    ) -> Result<(), BusError>;

    /// Replace the payload (and name) of an existing logical message.
    async fn update(&self, serial: &str, name: String, data: String) -> Result<(), BusError>;

    async fn subscribe(&self) -> Result<Subscription, BusError>;

    fn unsubscribe(&self, subscription_id: u64);

    /// Query stored messages, newest-first. See [`HistoryOptions`].
    async fn history(&self, options: HistoryOptions) -> Result<Vec<InboundMessage>, BusError>;

    async fn presence_enter(&self, client_id: &str, data: Value) -> Result<(), BusError>;

    async fn presence_leave(&self, client_id: &str) -> Result<(), BusError>;

    async fn presence_members(&self) -> Result<Vec<PresenceMember>, BusError>;

    fn presence_subscribe(&self) -> mpsc::UnboundedReceiver<PresenceEvent>;
}
