//! Publish-side chunk codec.
//!
//! Consumes a stream of [`UiChunk`]s and encodes it onto bus operations:
//! one create per logical chunk, pipelined appends for its deltas, and
//! updates for tool results. Appends are issued without awaiting through an
//! ordered writer task; creates and updates suspend until the bus acks,
//! because appends need the create's serial and updates are terminal for
//! their chunk. All pipelined appends are drained before any terminal goes
//! out, so a subscriber that sees `finish` has seen every delta.

use super::chunk::UiChunk;
use super::wire;
use crate::abort::AbortHandle;
use crate::bus::{
    BusChannel, BusError, OutboundMessage, HEADER_EVENT, HEADER_PROMPT_ID, HEADER_ROLE,
    ROLE_ASSISTANT,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Publish error types
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("upstream read error: {0}")]
    Upstream(String),

    #[error("bus write error: {0}")]
    Bus(#[from] BusError),
}

/// Options for [`publish_chunks`].
#[derive(Clone, Default)]
pub struct PublishOptions {
    /// Tag every published message with this prompt id, tying the output
    /// to the user prompt that triggered it.
    pub prompt_id: Option<String>,
    /// External cancellation; on trigger the input is no longer pulled and
    /// a single `abort` terminal is published unless one already went out.
    pub abort: Option<AbortHandle>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt_id(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = Some(prompt_id.into());
        self
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }
}

/// Encode `stream` onto the channel. Resolves when the input ends; fails
/// with [`PublishError::Upstream`] when the input errors and
/// [`PublishError::Bus`] when a bus operation rejects. On either failure a
/// single terminal `error` is published (unless a terminal already was)
/// before the error propagates.
pub async fn publish_chunks<S, E>(
    channel: Arc<dyn BusChannel>,
    stream: S,
    options: PublishOptions,
) -> Result<(), PublishError>
where
    S: Stream<Item = Result<UiChunk, E>> + Send,
    E: Display,
{
    let abort = options.abort.clone().unwrap_or_default();
    let mut publisher = ChunkPublisher::new(channel, options.prompt_id);
    futures::pin_mut!(stream);

    loop {
        let item = tokio::select! {
            _ = abort.aborted() => {
                if let Err(err) = publisher.drain().await {
                    log::warn!("drain after abort failed: {}", err);
                }
                publisher.publish_terminal(wire::ABORT, json!({})).await;
                return Ok(());
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(chunk)) => {
                if let Err(err) = publisher.handle_chunk(chunk).await {
                    let _ = publisher.drain().await;
                    publisher
                        .publish_terminal(wire::ERROR, json!({ "errorText": err.to_string() }))
                        .await;
                    return Err(PublishError::Bus(err));
                }
            }
            Some(Err(err)) => {
                let text = err.to_string();
                let _ = publisher.drain().await;
                publisher
                    .publish_terminal(wire::ERROR, json!({ "errorText": text }))
                    .await;
                return Err(PublishError::Upstream(text));
            }
            None => {
                if let Err(err) = publisher.drain().await {
                    publisher
                        .publish_terminal(wire::ERROR, json!({ "errorText": err.to_string() }))
                        .await;
                    return Err(PublishError::Bus(err));
                }
                return Ok(());
            }
        }
    }
}

// ============================================================================
// Ordered bus writer
// ============================================================================

// All operations flow through one writer task so the wire order matches the
// issue order even though appends are not awaited by the caller.
enum BusJob {
    Create {
        message: OutboundMessage,
        done: oneshot::Sender<Result<String, BusError>>,
    },
    Append {
        serial: String,
        data: String,
        event: Option<String>,
    },
    Update {
        serial: String,
        name: String,
        data: String,
        done: oneshot::Sender<Result<(), BusError>>,
    },
    Flush {
        done: oneshot::Sender<Option<BusError>>,
    },
}

fn spawn_writer(channel: Arc<dyn BusChannel>) -> mpsc::UnboundedSender<BusJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<BusJob>();
    tokio::spawn(async move {
        let mut append_error: Option<BusError> = None;
        while let Some(job) = rx.recv().await {
            match job {
                BusJob::Create { message, done } => {
                    let _ = done.send(channel.publish(message).await);
                }
                BusJob::Append {
                    serial,
                    data,
                    event,
                } => {
                    // After the first append failure the remaining pipelined
                    // appends are skipped; the next flush surfaces the error.
                    if append_error.is_none() {
                        if let Err(err) = channel.append(&serial, data, event).await {
                            append_error = Some(err);
                        }
                    }
                }
                BusJob::Update {
                    serial,
                    name,
                    data,
                    done,
                } => {
                    let _ = done.send(channel.update(&serial, name, data).await);
                }
                BusJob::Flush { done } => {
                    let _ = done.send(append_error.take());
                }
            }
        }
    });
    tx
}

// ============================================================================
// Chunk publisher
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Text,
    Reasoning,
    ToolInput,
}

struct StoredSerial {
    serial: String,
    kind: StreamKind,
}

struct ChunkPublisher {
    writer: mpsc::UnboundedSender<BusJob>,
    base_headers: HashMap<String, String>,
    /// Logical chunk id (text id / reasoning id / toolCallId) → serial of
    /// the bus message its deltas and results must target.
    serials: HashMap<String, StoredSerial>,
    terminal_published: bool,
}

impl ChunkPublisher {
    fn new(channel: Arc<dyn BusChannel>, prompt_id: Option<String>) -> Self {
        let mut base_headers = HashMap::new();
        base_headers.insert(HEADER_ROLE.to_string(), ROLE_ASSISTANT.to_string());
        if let Some(prompt_id) = prompt_id {
            base_headers.insert(HEADER_PROMPT_ID.to_string(), prompt_id);
        }
        Self {
            writer: spawn_writer(channel),
            base_headers,
            serials: HashMap::new(),
            terminal_published: false,
        }
    }

    fn headers(&self) -> HashMap<String, String> {
        self.base_headers.clone()
    }

    async fn create(&self, message: OutboundMessage) -> Result<String, BusError> {
        let (done, ack) = oneshot::channel();
        self.writer
            .send(BusJob::Create { message, done })
            .map_err(|_| BusError::WriteRejected("bus writer stopped".into()))?;
        ack.await
            .map_err(|_| BusError::WriteRejected("bus writer stopped".into()))?
    }

    fn append(&self, serial: &str, data: String, event: &str) {
        let _ = self.writer.send(BusJob::Append {
            serial: serial.to_string(),
            data,
            event: Some(event.to_string()),
        });
    }

    async fn update(&self, serial: &str, name: String, data: String) -> Result<(), BusError> {
        let (done, ack) = oneshot::channel();
        self.writer
            .send(BusJob::Update {
                serial: serial.to_string(),
                name,
                data,
                done,
            })
            .map_err(|_| BusError::WriteRejected("bus writer stopped".into()))?;
        ack.await
            .map_err(|_| BusError::WriteRejected("bus writer stopped".into()))?
    }

    /// Wait until every pipelined append has reached the bus; surfaces the
    /// first append failure, if any.
    async fn drain(&self) -> Result<(), BusError> {
        let (done, ack) = oneshot::channel();
        self.writer
            .send(BusJob::Flush { done })
            .map_err(|_| BusError::WriteRejected("bus writer stopped".into()))?;
        match ack.await {
            Ok(Some(err)) => Err(err),
            Ok(None) => Ok(()),
            Err(_) => Err(BusError::WriteRejected("bus writer stopped".into())),
        }
    }

    /// Publish a `finish`/`error`/`abort` create, at most once per stream.
    async fn publish_terminal(&mut self, name: &str, body: Value) {
        if self.terminal_published {
            return;
        }
        self.terminal_published = true;
        let message = OutboundMessage::new(name, body.to_string()).with_headers(self.headers());
        if let Err(err) = self.create(message).await {
            log::error!("failed to publish terminal '{}': {}", name, err);
        }
    }

    async fn create_streaming(
        &mut self,
        id: &str,
        label: String,
        kind: StreamKind,
        headers: HashMap<String, String>,
    ) -> Result<(), BusError> {
        let serial = self
            .create(OutboundMessage::new(label, "").with_headers(headers))
            .await?;
        self.serials.insert(id.to_string(), StoredSerial { serial, kind });
        Ok(())
    }

    async fn handle_chunk(&mut self, chunk: UiChunk) -> Result<(), BusError> {
        match chunk {
            // Synthesized by the subscribe side; never on the wire.
            UiChunk::Start {
                message_id: None,
                message_metadata: None,
            }
            | UiChunk::StartStep => Ok(()),

            UiChunk::Start {
                message_id,
                message_metadata,
            } => {
                let mut body = serde_json::Map::new();
                if let Some(message_id) = message_id {
                    body.insert("messageId".into(), Value::String(message_id));
                }
                if let Some(metadata) = message_metadata {
                    body.insert("messageMetadata".into(), metadata);
                }
                self.create(
                    OutboundMessage::new(wire::START, Value::Object(body).to_string())
                        .with_headers(self.headers()),
                )
                .await?;
                Ok(())
            }

            UiChunk::TextStart {
                id,
                provider_metadata,
            } => {
                let mut headers = self.headers();
                if let Some(metadata) = provider_metadata {
                    headers.insert("providerMetadata".into(), metadata.to_string());
                }
                self.create_streaming(&id, wire::text_label(&id), StreamKind::Text, headers)
                    .await
            }
            UiChunk::TextDelta { id, delta } => {
                match self.serials.get(&id) {
                    Some(entry) => self.append(&entry.serial, delta, wire::TEXT_DELTA),
                    None => log::debug!("text delta for unknown id '{}' dropped", id),
                }
                Ok(())
            }
            UiChunk::TextEnd { id } => {
                match self.serials.remove(&id) {
                    Some(entry) => self.append(&entry.serial, String::new(), wire::TEXT_END),
                    None => log::debug!("text end for unknown id '{}' dropped", id),
                }
                Ok(())
            }

            UiChunk::ReasoningStart {
                id,
                provider_metadata,
            } => {
                let mut headers = self.headers();
                if let Some(metadata) = provider_metadata {
                    headers.insert("providerMetadata".into(), metadata.to_string());
                }
                self.create_streaming(
                    &id,
                    wire::reasoning_label(&id),
                    StreamKind::Reasoning,
                    headers,
                )
                .await
            }
            UiChunk::ReasoningDelta { id, delta } => {
                match self.serials.get(&id) {
                    Some(entry) => self.append(&entry.serial, delta, wire::REASONING_DELTA),
                    None => log::debug!("reasoning delta for unknown id '{}' dropped", id),
                }
                Ok(())
            }
            UiChunk::ReasoningEnd { id } => {
                match self.serials.remove(&id) {
                    Some(entry) => self.append(&entry.serial, String::new(), wire::REASONING_END),
                    None => log::debug!("reasoning end for unknown id '{}' dropped", id),
                }
                Ok(())
            }

            UiChunk::ToolInputStart {
                tool_call_id,
                tool_name,
                dynamic,
                title,
                provider_executed,
            } => {
                let mut headers = self.headers();
                insert_flag(&mut headers, "dynamic", dynamic);
                insert_flag(&mut headers, "providerExecuted", provider_executed);
                if let Some(title) = title {
                    headers.insert("title".into(), title);
                }
                self.create_streaming(
                    &tool_call_id,
                    wire::tool_label(&tool_call_id, &tool_name),
                    StreamKind::ToolInput,
                    headers,
                )
                .await
            }
            UiChunk::ToolInputDelta {
                tool_call_id,
                input_text_delta,
            } => {
                match self.serials.get(&tool_call_id) {
                    Some(entry) => {
                        self.append(&entry.serial, input_text_delta, wire::TOOL_INPUT_DELTA)
                    }
                    None => log::debug!("tool delta for unknown call '{}' dropped", tool_call_id),
                }
                Ok(())
            }
            UiChunk::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
                dynamic,
                title,
                provider_executed,
            } => {
                if let Some(entry) = self.serials.get(&tool_call_id) {
                    if entry.kind == StreamKind::ToolInput {
                        // Streaming case: terminate the pipelined input.
                        self.append(&entry.serial, String::new(), wire::TOOL_INPUT_END);
                        return Ok(());
                    }
                }
                // Non-streaming case: a single create carrying the full input.
                let mut headers = self.headers();
                headers.insert(HEADER_EVENT.into(), wire::TOOL_INPUT_AVAILABLE.into());
                insert_flag(&mut headers, "dynamic", dynamic);
                insert_flag(&mut headers, "providerExecuted", provider_executed);
                if let Some(title) = title {
                    headers.insert("title".into(), title);
                }
                let serial = self
                    .create(
                        OutboundMessage::new(
                            wire::tool_label(&tool_call_id, &tool_name),
                            input.to_string(),
                        )
                        .with_headers(headers),
                    )
                    .await?;
                self.serials.insert(
                    tool_call_id,
                    StoredSerial {
                        serial,
                        kind: StreamKind::ToolInput,
                    },
                );
                Ok(())
            }
            UiChunk::ToolInputError {
                tool_call_id,
                error_text,
            } => {
                let Some(entry) = self.serials.remove(&tool_call_id) else {
                    log::debug!("tool input error for unknown call '{}' dropped", tool_call_id);
                    return Ok(());
                };
                self.update(
                    &entry.serial,
                    wire::tool_error_label(&tool_call_id),
                    json!({ "errorText": error_text }).to_string(),
                )
                .await
            }

            UiChunk::ToolOutputAvailable {
                tool_call_id,
                output,
                dynamic,
                provider_executed,
                preliminary,
            } => {
                let Some(entry) = self.serials.get(&tool_call_id) else {
                    log::debug!("tool output for unknown call '{}' dropped", tool_call_id);
                    return Ok(());
                };
                let serial = entry.serial.clone();
                let mut body = serde_json::Map::new();
                body.insert("output".into(), output);
                if let Some(dynamic) = dynamic {
                    body.insert("dynamic".into(), Value::Bool(dynamic));
                }
                if let Some(executed) = provider_executed {
                    body.insert("providerExecuted".into(), Value::Bool(executed));
                }
                if let Some(preliminary) = preliminary {
                    body.insert("preliminary".into(), Value::Bool(preliminary));
                }
                self.update(
                    &serial,
                    wire::tool_output_label(&tool_call_id),
                    Value::Object(body).to_string(),
                )
                .await?;
                // A preliminary output keeps the serial alive for the final one.
                if preliminary != Some(true) {
                    self.serials.remove(&tool_call_id);
                }
                Ok(())
            }
            UiChunk::ToolOutputError {
                tool_call_id,
                error_text,
                dynamic,
            } => {
                let Some(entry) = self.serials.remove(&tool_call_id) else {
                    log::debug!("tool error for unknown call '{}' dropped", tool_call_id);
                    return Ok(());
                };
                let mut body = serde_json::Map::new();
                body.insert("errorText".into(), Value::String(error_text));
                if let Some(dynamic) = dynamic {
                    body.insert("dynamic".into(), Value::Bool(dynamic));
                }
                self.update(
                    &entry.serial,
                    wire::tool_error_label(&tool_call_id),
                    Value::Object(body).to_string(),
                )
                .await
            }
            UiChunk::ToolOutputDenied { tool_call_id } => {
                let Some(entry) = self.serials.remove(&tool_call_id) else {
                    log::debug!("tool denial for unknown call '{}' dropped", tool_call_id);
                    return Ok(());
                };
                self.update(
                    &entry.serial,
                    wire::tool_denied_label(&tool_call_id),
                    "{}".to_string(),
                )
                .await
            }
            UiChunk::ToolApprovalRequest {
                tool_call_id,
                approval_id,
            } => {
                self.create(
                    OutboundMessage::new(
                        wire::tool_approval_label(&tool_call_id),
                        json!({ "approvalId": approval_id }).to_string(),
                    )
                    .with_headers(self.headers()),
                )
                .await?;
                Ok(())
            }

            UiChunk::File { url, media_type } => {
                self.create(
                    OutboundMessage::new(
                        wire::FILE,
                        json!({ "url": url, "mediaType": media_type }).to_string(),
                    )
                    .with_headers(self.headers()),
                )
                .await?;
                Ok(())
            }
            UiChunk::SourceUrl {
                source_id,
                url,
                title,
            } => {
                let mut body = serde_json::Map::new();
                body.insert("sourceId".into(), Value::String(source_id));
                body.insert("url".into(), Value::String(url));
                if let Some(title) = title {
                    body.insert("title".into(), Value::String(title));
                }
                self.create(
                    OutboundMessage::new(wire::SOURCE_URL, Value::Object(body).to_string())
                        .with_headers(self.headers()),
                )
                .await?;
                Ok(())
            }
            UiChunk::SourceDocument {
                source_id,
                media_type,
                title,
                filename,
            } => {
                let mut body = serde_json::Map::new();
                body.insert("sourceId".into(), Value::String(source_id));
                body.insert("mediaType".into(), Value::String(media_type));
                body.insert("title".into(), Value::String(title));
                if let Some(filename) = filename {
                    body.insert("filename".into(), Value::String(filename));
                }
                self.create(
                    OutboundMessage::new(wire::SOURCE_DOCUMENT, Value::Object(body).to_string())
                        .with_headers(self.headers()),
                )
                .await?;
                Ok(())
            }
            UiChunk::Data {
                name,
                data,
                id,
                transient,
            } => {
                let mut body = serde_json::Map::new();
                body.insert("data".into(), data);
                if let Some(id) = id {
                    body.insert("id".into(), Value::String(id));
                }
                self.create(
                    OutboundMessage::new(wire::data_label(&name), Value::Object(body).to_string())
                        .with_headers(self.headers())
                        .ephemeral(transient == Some(true)),
                )
                .await?;
                Ok(())
            }
            UiChunk::MessageMetadata { message_metadata } => {
                self.create(
                    OutboundMessage::new(
                        wire::METADATA,
                        json!({ "messageMetadata": message_metadata }).to_string(),
                    )
                    .with_headers(self.headers()),
                )
                .await?;
                Ok(())
            }

            UiChunk::FinishStep => {
                self.drain().await?;
                self.create(
                    OutboundMessage::new(wire::STEP_FINISH, "{}").with_headers(self.headers()),
                )
                .await?;
                Ok(())
            }
            UiChunk::Finish {
                finish_reason,
                message_metadata,
            } => {
                self.drain().await?;
                let mut body = serde_json::Map::new();
                body.insert(
                    "finishReason".into(),
                    serde_json::to_value(finish_reason).unwrap_or(Value::Null),
                );
                if let Some(metadata) = message_metadata {
                    body.insert("messageMetadata".into(), metadata);
                }
                self.publish_terminal(wire::FINISH, Value::Object(body)).await;
                Ok(())
            }
            UiChunk::Error { error_text } => {
                self.drain().await?;
                self.publish_terminal(wire::ERROR, json!({ "errorText": error_text }))
                    .await;
                Ok(())
            }
            UiChunk::Abort { reason } => {
                self.drain().await?;
                let mut body = serde_json::Map::new();
                if let Some(reason) = reason {
                    body.insert("reason".into(), Value::String(reason));
                }
                self.publish_terminal(wire::ABORT, Value::Object(body)).await;
                Ok(())
            }
        }
    }
}

fn insert_flag(headers: &mut HashMap<String, String>, key: &str, value: Option<bool>) {
    if let Some(value) = value {
        headers.insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusAction, BusEvent, MemoryBus};
    use crate::chat::chunk::{FinishReason, TransportError};
    use futures::stream;

    fn input(chunks: Vec<UiChunk>) -> impl Stream<Item = Result<UiChunk, TransportError>> + Send {
        stream::iter(chunks.into_iter().map(Ok))
    }

    fn drain_events(sub: &mut crate::bus::Subscription) -> Vec<crate::bus::InboundMessage> {
        let mut out = Vec::new();
        while let Ok(event) = sub.events.try_recv() {
            if let BusEvent::Message(message) = event {
                out.push(message);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_text_stream_encodes_as_create_appends() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe().await.unwrap();

        let chunks = vec![
            UiChunk::start(),
            UiChunk::StartStep,
            UiChunk::TextStart {
                id: "t0".into(),
                provider_metadata: None,
            },
            UiChunk::TextDelta {
                id: "t0".into(),
                delta: "Hello".into(),
            },
            UiChunk::TextEnd { id: "t0".into() },
            UiChunk::FinishStep,
            UiChunk::Finish {
                finish_reason: FinishReason::Stop,
                message_metadata: None,
            },
        ];
        publish_chunks(bus.clone(), input(chunks), PublishOptions::new())
            .await
            .unwrap();

        let wire: Vec<(String, BusAction)> = drain_events(&mut sub)
            .into_iter()
            .map(|m| (m.name, m.action))
            .collect();
        assert_eq!(
            wire,
            vec![
                ("text:t0".to_string(), BusAction::Create),
                ("text:t0".to_string(), BusAction::Append),
                ("text:t0".to_string(), BusAction::Append),
                ("step-finish".to_string(), BusAction::Create),
                ("finish".to_string(), BusAction::Create),
            ]
        );
    }

    #[tokio::test]
    async fn test_every_message_carries_assistant_role_and_prompt_id() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe().await.unwrap();

        let chunks = vec![
            UiChunk::TextStart {
                id: "t0".into(),
                provider_metadata: None,
            },
            UiChunk::Finish {
                finish_reason: FinishReason::Stop,
                message_metadata: None,
            },
        ];
        publish_chunks(
            bus.clone(),
            input(chunks),
            PublishOptions::new().with_prompt_id("p1"),
        )
        .await
        .unwrap();

        for message in drain_events(&mut sub) {
            assert_eq!(message.role(), Some(ROLE_ASSISTANT));
            assert_eq!(message.prompt_id(), Some("p1"));
        }
    }

    #[tokio::test]
    async fn test_non_streaming_tool_is_a_single_create() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe().await.unwrap();

        let chunks = vec![
            UiChunk::ToolInputAvailable {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                input: json!({"q": "ai"}),
                dynamic: None,
                title: None,
                provider_executed: None,
            },
            UiChunk::Finish {
                finish_reason: FinishReason::ToolCalls,
                message_metadata: None,
            },
        ];
        publish_chunks(bus.clone(), input(chunks), PublishOptions::new())
            .await
            .unwrap();

        let events = drain_events(&mut sub);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "tool:c1:search");
        assert_eq!(events[0].action, BusAction::Create);
        assert_eq!(events[0].header(HEADER_EVENT), Some("tool-input-available"));
        assert_eq!(events[0].data, "{\"q\":\"ai\"}");
    }

    #[tokio::test]
    async fn test_tool_output_updates_the_input_message() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe().await.unwrap();

        let chunks = vec![
            UiChunk::ToolInputStart {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                dynamic: None,
                title: None,
                provider_executed: None,
            },
            UiChunk::ToolInputDelta {
                tool_call_id: "c1".into(),
                input_text_delta: "{}".into(),
            },
            UiChunk::ToolInputAvailable {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                input: json!({}),
                dynamic: None,
                title: None,
                provider_executed: None,
            },
            UiChunk::ToolOutputAvailable {
                tool_call_id: "c1".into(),
                output: json!({"hits": 1}),
                dynamic: None,
                provider_executed: None,
                preliminary: None,
            },
        ];
        publish_chunks(bus.clone(), input(chunks), PublishOptions::new())
            .await
            .unwrap();

        let events = drain_events(&mut sub);
        let last = events.last().unwrap();
        assert_eq!(last.action, BusAction::Update);
        assert_eq!(last.name, "tool-output:c1");
        // The update targets the serial assigned to the tool create.
        assert_eq!(last.serial, events[0].serial);
    }

    #[tokio::test]
    async fn test_terminal_published_at_most_once() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe().await.unwrap();

        let chunks = vec![
            UiChunk::Finish {
                finish_reason: FinishReason::Stop,
                message_metadata: None,
            },
            UiChunk::Error {
                error_text: "late".into(),
            },
            UiChunk::Abort { reason: None },
        ];
        publish_chunks(bus.clone(), input(chunks), PublishOptions::new())
            .await
            .unwrap();

        let names: Vec<String> = drain_events(&mut sub).into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["finish".to_string()]);
    }

    #[tokio::test]
    async fn test_abort_signal_publishes_single_abort() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe().await.unwrap();

        let abort = AbortHandle::new();
        // An input that stays pending forever; the abort must end the publish.
        let pending = stream::once(async {
            futures::future::pending::<()>().await;
            Ok::<UiChunk, TransportError>(UiChunk::start())
        });

        let task = tokio::spawn(publish_chunks(
            bus.clone(),
            pending,
            PublishOptions::new().with_abort(abort.clone()),
        ));
        tokio::task::yield_now().await;
        abort.abort();
        task.await.unwrap().unwrap();

        let names: Vec<String> = drain_events(&mut sub).into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["abort".to_string()]);
    }

    #[tokio::test]
    async fn test_upstream_error_publishes_error_terminal() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe().await.unwrap();

        let failing = stream::iter(vec![
            Ok(UiChunk::TextStart {
                id: "t0".into(),
                provider_metadata: None,
            }),
            Err(TransportError::Handler("model exploded".into())),
        ]);
        let err = publish_chunks(bus.clone(), failing, PublishOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Upstream(_)));

        let events = drain_events(&mut sub);
        let last = events.last().unwrap();
        assert_eq!(last.name, "error");
        assert!(last.data.contains("model exploded"));
    }

    #[tokio::test]
    async fn test_transient_data_is_ephemeral() {
        let bus = Arc::new(MemoryBus::new());
        let mut sub = bus.subscribe().await.unwrap();

        let chunks = vec![UiChunk::Data {
            name: "progress".into(),
            data: json!({"pct": 40}),
            id: None,
            transient: Some(true),
        }];
        publish_chunks(bus.clone(), input(chunks), PublishOptions::new())
            .await
            .unwrap();

        let events = drain_events(&mut sub);
        assert_eq!(events[0].name, "data-progress");
        assert!(events[0].ephemeral);
    }
}
