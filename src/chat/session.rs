//! Server conversation session.
//!
//! A session owns one channel and one ordered message list. It seeds the
//! list from history, dispatches incoming user events to the caller's
//! handler, publishes the handler's chunk stream tagged with the prompt id,
//! and folds the emitted chunks back into the list. At most one generation
//! runs at a time: a new prompt aborts the previous one and waits for it to
//! settle, so appends from superseded generations never interleave.

use super::accumulate::accumulate_chunks;
use super::chunk::{BoxChunkStream, TransportError, UiChunk};
use super::history::reconstruct_messages;
use super::message::{ChatMessage, ChatRole, ChatTrigger};
use super::publish::{publish_chunks, PublishOptions};
use super::wire;
use crate::abort::AbortHandle;
use crate::bus::{BusChannel, BusEvent, HistoryOptions, Subscription, ROLE_USER};
use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// What a generation sees: the conversation snapshot, why it started, and
/// the signal that cancels it.
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub trigger: ChatTrigger,
    pub abort: AbortHandle,
}

/// Caller-supplied model invocation: turns a request into a chunk stream.
pub type ChatHandler =
    Arc<dyn Fn(ChatRequest) -> BoxFuture<'static, Result<BoxChunkStream, TransportError>> + Send + Sync>;

/// Presence announcement for the serving agent.
#[derive(Clone, Debug)]
pub struct PresenceConfig {
    pub client_id: String,
    pub data: Value,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            client_id: "agent".to_string(),
            data: json!({ "type": "agent" }),
        }
    }
}

/// Options for [`host_session`].
#[derive(Clone)]
pub struct SessionOptions {
    pub history_limit: usize,
    pub initial_messages: Vec<ChatMessage>,
    pub presence: Option<PresenceConfig>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            history_limit: 100,
            initial_messages: Vec::new(),
            presence: None,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_initial_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.initial_messages = messages;
        self
    }

    pub fn with_presence(mut self, presence: PresenceConfig) -> Self {
        self.presence = Some(presence);
        self
    }
}

/// Running session; call [`SessionHandle::cleanup`] to tear it down.
pub struct SessionHandle {
    cancel: AbortHandle,
    task: JoinHandle<()>,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
}

impl SessionHandle {
    /// Snapshot of the session's conversation list.
    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.messages).clone()
    }

    /// Abort any in-flight generation, leave presence, unsubscribe.
    pub async fn cleanup(self) {
        self.cancel.abort();
        if let Err(err) = self.task.await {
            log::warn!("session task ended abnormally: {}", err);
        }
    }
}

/// Serve one conversation channel with the given handler.
pub async fn host_session(
    channel: Arc<dyn BusChannel>,
    handler: ChatHandler,
    options: SessionOptions,
) -> Result<SessionHandle, TransportError> {
    let subscription = channel.subscribe().await?;

    // Seed the list from history, deduplicated by id against any messages
    // the caller brought along.
    let history = channel
        .history(
            HistoryOptions::until_attach(subscription.id).with_limit(options.history_limit),
        )
        .await?;
    let chronological: Vec<_> = history.into_iter().rev().collect();
    let mut seeded = options.initial_messages.clone();
    for message in reconstruct_messages(&chronological).messages {
        if !seeded.iter().any(|existing| existing.id == message.id) {
            seeded.push(message);
        }
    }
    let messages = Arc::new(Mutex::new(seeded));

    let presence_id = match &options.presence {
        Some(presence) => {
            channel
                .presence_enter(&presence.client_id, presence.data.clone())
                .await?;
            Some(presence.client_id.clone())
        }
        None => None,
    };

    let cancel = AbortHandle::new();
    let task = tokio::spawn(session_loop(
        channel,
        subscription,
        handler,
        messages.clone(),
        presence_id,
        cancel.clone(),
    ));

    Ok(SessionHandle {
        cancel,
        task,
        messages,
    })
}

// ============================================================================
// Event loop
// ============================================================================

struct Inflight {
    abort: AbortHandle,
    task: JoinHandle<()>,
}

async fn session_loop(
    channel: Arc<dyn BusChannel>,
    subscription: Subscription,
    handler: ChatHandler,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    presence_id: Option<String>,
    cancel: AbortHandle,
) {
    let mut events = subscription.events;
    let mut inflight: Option<Inflight> = None;

    loop {
        let event = tokio::select! {
            _ = cancel.aborted() => break,
            event = events.recv() => event,
        };
        let message = match event {
            Some(BusEvent::Message(message)) => message,
            Some(BusEvent::Failed { reason }) => {
                // Logged and survived; the session tears down only on cleanup.
                log::error!("channel entered failed state: {}", reason);
                continue;
            }
            None => break,
        };
        if message.role() != Some(ROLE_USER) {
            continue;
        }

        match wire::parse_label(&message.name) {
            wire::Label::ChatMessage => {
                let user_message = match serde_json::from_str::<ChatMessage>(&message.data) {
                    Ok(user_message) => user_message,
                    Err(err) => {
                        log::warn!("unparseable chat-message: {}", err);
                        continue;
                    }
                };
                {
                    let mut list = lock(&messages);
                    if list.iter().any(|m| m.id == user_message.id) {
                        log::debug!("duplicate user message '{}' dropped", user_message.id);
                    } else {
                        list.push(user_message);
                    }
                }
                abort_and_settle(&mut inflight).await;
                inflight = Some(start_generation(
                    channel.clone(),
                    handler.clone(),
                    messages.clone(),
                    ChatTrigger::SubmitMessage,
                    message.prompt_id().map(String::from),
                ));
            }
            wire::Label::Regenerate => {
                let body: Value = serde_json::from_str(&message.data).unwrap_or(Value::Null);
                // Settle first: the reply to remove may still be mid-accumulation.
                abort_and_settle(&mut inflight).await;
                {
                    let mut list = lock(&messages);
                    match body.get("messageId").and_then(Value::as_str) {
                        Some(message_id) => {
                            if let Some(index) = list.iter().position(|m| m.id == message_id) {
                                list.truncate(index);
                            }
                        }
                        None => {
                            if list.last().is_some_and(|m| m.role == ChatRole::Assistant) {
                                list.pop();
                            }
                        }
                    }
                }
                inflight = Some(start_generation(
                    channel.clone(),
                    handler.clone(),
                    messages.clone(),
                    ChatTrigger::RegenerateMessage,
                    message.prompt_id().map(String::from),
                ));
            }
            wire::Label::UserAbort => {
                if let Some(inflight) = &inflight {
                    inflight.abort.abort();
                }
            }
            _ => {}
        }
    }

    abort_and_settle(&mut inflight).await;
    channel.unsubscribe(subscription.id);
    if let Some(client_id) = presence_id {
        if let Err(err) = channel.presence_leave(&client_id).await {
            log::warn!("presence leave failed: {}", err);
        }
    }
}

/// Cancel the running generation and wait for it to settle, swallowing its
/// failure. Prevents append/update races across prompts.
async fn abort_and_settle(inflight: &mut Option<Inflight>) {
    if let Some(inflight) = inflight.take() {
        inflight.abort.abort();
        if let Err(err) = inflight.task.await {
            log::warn!("generation task ended abnormally: {}", err);
        }
    }
}

fn start_generation(
    channel: Arc<dyn BusChannel>,
    handler: ChatHandler,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    trigger: ChatTrigger,
    prompt_id: Option<String>,
) -> Inflight {
    let abort = AbortHandle::new();
    let request = ChatRequest {
        messages: lock(&messages).clone(),
        trigger,
        abort: abort.clone(),
    };

    let generation_abort = abort.clone();
    let task = tokio::spawn(async move {
        let stream = match handler(request).await {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("chat handler failed: {}", err);
                // Clients still need a terminal so their streams close.
                let error_stream = futures::stream::iter(vec![Ok::<_, TransportError>(
                    UiChunk::Error {
                        error_text: err.to_string(),
                    },
                )]);
                let options = PublishOptions {
                    prompt_id,
                    abort: None,
                };
                if let Err(err) = publish_chunks(channel, error_stream, options).await {
                    log::error!("failed to publish handler error: {}", err);
                }
                return;
            }
        };

        let collected: Arc<Mutex<Vec<UiChunk>>> = Arc::new(Mutex::new(Vec::new()));
        let tee = tee_chunks(stream, collected.clone());
        let options = PublishOptions {
            prompt_id,
            abort: Some(generation_abort),
        };
        if let Err(err) = publish_chunks(channel, tee, options).await {
            log::error!("generation publish failed: {}", err);
        }

        // Whatever made it onto the wire (including a partial, aborted
        // reply) becomes part of the conversation.
        let chunks = std::mem::take(&mut *lock(&collected));
        let replies = accumulate_chunks(&chunks);
        let mut list = lock(&messages);
        for reply in replies {
            if !list.iter().any(|existing| existing.id == reply.id) {
                list.push(reply);
            }
        }
    });

    Inflight { abort, task }
}

/// Copy every chunk flowing to the publisher into `sink`.
fn tee_chunks(
    stream: BoxChunkStream,
    sink: Arc<Mutex<Vec<UiChunk>>>,
) -> impl futures::Stream<Item = Result<UiChunk, TransportError>> + Send {
    async_stream::stream! {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            if let Ok(chunk) = &item {
                lock(&sink).push(chunk.clone());
            }
            yield item;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
