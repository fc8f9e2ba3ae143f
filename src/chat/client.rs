//! Client transport: the UI-facing counterpart of the server session.
//!
//! Publishes user events (`chat-message`, `regenerate`, `user-abort`) and
//! hands back decoded chunk streams for the assistant's replies. At most
//! one stream is live per transport; a new send cancels the previous one
//! synchronously before anything is published.

use super::chunk::TransportError;
use super::history::{reconstruct_messages, ChatHistory};
use super::message::{ChatMessage, ChatTrigger};
use super::presence::{watch_agent_presence, PresenceWatch};
use super::replay::{resume_stream, ResumeOptions};
use super::subscribe::{open_stream, ChunkStream, StreamHandle, SubscribeOptions};
use super::wire;
use crate::abort::AbortHandle;
use crate::bus::{
    BusChannel, HistoryOptions, OutboundMessage, HEADER_PROMPT_ID, HEADER_ROLE, ROLE_USER,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Options for [`ClientTransport::send_messages`].
#[derive(Clone, Default)]
pub struct SendOptions {
    /// Regeneration target; the list is truncated at this message before
    /// the server regenerates. Ignored for `SubmitMessage`.
    pub message_id: Option<String>,
    /// The conversation as the client sees it. Only the last message is
    /// published for a submit; the server holds the rest.
    pub messages: Vec<ChatMessage>,
    /// Caller-side abort: publishes `user-abort` but leaves the stream
    /// open so the generation's final chunks still arrive.
    pub abort: Option<AbortHandle>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }
}

pub struct ClientTransport {
    channel: Arc<dyn BusChannel>,
    active: Mutex<Option<StreamHandle>>,
}

impl ClientTransport {
    pub fn new(channel: Arc<dyn BusChannel>) -> Self {
        Self {
            channel,
            active: Mutex::new(None),
        }
    }

    /// Publish a user prompt and stream the resulting generation.
    ///
    /// Mints a fresh prompt id; the returned stream only carries chunks
    /// tagged with it, so a superseded generation cannot bleed in.
    pub async fn send_messages(
        &self,
        trigger: ChatTrigger,
        options: SendOptions,
    ) -> Result<ChunkStream, TransportError> {
        self.close();

        let prompt_id = Uuid::new_v4().to_string();
        let (name, data) = match trigger {
            ChatTrigger::SubmitMessage => {
                let last = options.messages.last().ok_or_else(|| {
                    TransportError::InvalidRequest(
                        "send_messages requires at least one message".to_string(),
                    )
                })?;
                (wire::CHAT_MESSAGE, serde_json::to_string(last)?)
            }
            ChatTrigger::RegenerateMessage => {
                let mut body = serde_json::Map::new();
                if let Some(message_id) = &options.message_id {
                    body.insert("messageId".into(), Value::String(message_id.clone()));
                }
                (wire::REGENERATE, Value::Object(body).to_string())
            }
        };

        // Attach before publishing so the first reply chunks cannot slip
        // past; our own event is filtered out by the decoder.
        let stream = open_stream(
            self.channel.clone(),
            SubscribeOptions::new().with_prompt_id(prompt_id.clone()),
        )
        .await?;
        *lock(&self.active) = Some(stream.handle());

        let publish = OutboundMessage::new(name, data)
            .with_header(HEADER_ROLE, ROLE_USER)
            .with_header(HEADER_PROMPT_ID, prompt_id.clone());
        if let Err(err) = self.channel.publish(publish).await {
            stream.cancel();
            return Err(err.into());
        }

        if let Some(abort) = options.abort {
            spawn_abort_watch(self.channel.clone(), stream.handle(), abort, prompt_id);
        }
        Ok(stream)
    }

    /// Late-join the in-progress generation, if one exists. The replayed
    /// stream is not prompt-filtered.
    pub async fn reconnect_to_stream(
        &self,
        options: ResumeOptions,
    ) -> Result<Option<ChunkStream>, TransportError> {
        self.close();
        let stream = resume_stream(self.channel.clone(), options).await?;
        if let Some(stream) = &stream {
            *lock(&self.active) = Some(stream.handle());
        }
        Ok(stream)
    }

    /// Fetch and fold the channel's history for UI hydration.
    pub async fn load_chat_history(
        &self,
        limit: Option<usize>,
    ) -> Result<ChatHistory, TransportError> {
        // A short-lived attachment pins the history bound.
        let subscription = self.channel.subscribe().await?;
        let result = self
            .channel
            .history(HistoryOptions {
                until_attach: Some(subscription.id),
                limit,
            })
            .await;
        self.channel.unsubscribe(subscription.id);

        let chronological: Vec<_> = result?.into_iter().rev().collect();
        Ok(reconstruct_messages(&chronological))
    }

    /// Observe whether an agent is serving this channel.
    pub async fn on_agent_presence_change(
        &self,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> Result<PresenceWatch, TransportError> {
        watch_agent_presence(self.channel.clone(), callback).await
    }

    /// Synchronously cancel the active stream and unsubscribe.
    pub fn close(&self) {
        if let Some(previous) = lock(&self.active).take() {
            previous.cancel();
        }
    }
}

/// Forward a caller abort to the channel as a `user-abort` event. The
/// watch dissolves once the stream is over.
fn spawn_abort_watch(
    channel: Arc<dyn BusChannel>,
    stream: StreamHandle,
    abort: AbortHandle,
    prompt_id: String,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = abort.aborted() => {
                let message = OutboundMessage::new(wire::USER_ABORT, "{}")
                    .with_header(HEADER_ROLE, ROLE_USER)
                    .with_header(HEADER_PROMPT_ID, prompt_id);
                if let Err(err) = channel.publish(message).await {
                    log::warn!("failed to publish user-abort: {}", err);
                }
            }
            _ = stream.closed() => {}
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
