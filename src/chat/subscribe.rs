//! Subscribe-side chunk codec.
//!
//! Decodes bus messages (live and replayed) back into the UI chunk stream
//! the publish side consumed. Keeps one tracker per bus serial holding the
//! accumulated payload of the logical chunk, which makes two recoveries
//! possible: orphan appends whose create fell into the history window get a
//! synthesized `*-start`, and conflated updates (many appends coalesced by
//! the bus) are turned back into the missing delta by slicing off the
//! accumulated prefix.

use super::chunk::{FinishReason, TransportError, UiChunk};
use super::wire;
use crate::abort::AbortHandle;
use crate::bus::{
    BusChannel, BusEvent, InboundMessage, Subscription, HEADER_EVENT,
};
use futures::Stream;
use pin_project::pin_project;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Options for [`open_stream`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// When set, messages tagged with a different prompt id are skipped.
    /// This keeps chunks from a superseded generation out of the stream.
    pub prompt_id: Option<String>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt_id(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = Some(prompt_id.into());
        self
    }
}

/// Subscribe to the channel and decode everything published from now on.
pub async fn open_stream(
    channel: Arc<dyn BusChannel>,
    options: SubscribeOptions,
) -> Result<ChunkStream, TransportError> {
    let subscription = channel.subscribe().await?;
    Ok(spawn_stream(
        channel,
        subscription,
        options.prompt_id,
        Vec::new(),
    ))
}

// ============================================================================
// Chunk stream
// ============================================================================

/// Detached control for a [`ChunkStream`]; lets an owner other than the
/// stream consumer cancel it.
#[derive(Clone)]
pub struct StreamHandle {
    closed: AbortHandle,
    channel: Arc<dyn BusChannel>,
    subscription_id: u64,
}

impl StreamHandle {
    /// Unsubscribe and close the stream output. Messages still in flight
    /// are ignored.
    pub fn cancel(&self) {
        self.closed.abort();
        self.channel.unsubscribe(self.subscription_id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_aborted()
    }

    /// Resolve once the stream is over, whether it terminated naturally or
    /// was cancelled.
    pub async fn closed(&self) {
        self.closed.aborted().await;
    }
}

/// Stream of decoded UI chunks for one subscription.
#[pin_project]
pub struct ChunkStream {
    #[pin]
    inner: UnboundedReceiverStream<Result<UiChunk, TransportError>>,
    handle: StreamHandle,
}

impl ChunkStream {
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }
}

impl Stream for ChunkStream {
    type Item = Result<UiChunk, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// Drive a subscription through the decoder on a background task.
///
/// `history` (chronological) is replayed through the history handler before
/// the live events are drained; messages that arrived while history was
/// being fetched sit buffered in the subscription channel, so the cut
/// between replayed and live input is exactly the bus's attach point.
pub(crate) fn spawn_stream(
    channel: Arc<dyn BusChannel>,
    subscription: Subscription,
    prompt_id: Option<String>,
    history: Vec<InboundMessage>,
) -> ChunkStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = AbortHandle::new();
    let handle = StreamHandle {
        closed: closed.clone(),
        channel: channel.clone(),
        subscription_id: subscription.id,
    };

    tokio::spawn(async move {
        let mut events = subscription.events;
        let mut decoder = ChunkDecoder::new(prompt_id);
        let mut out = Vec::new();

        for message in &history {
            decoder.route_history(message, &mut out);
        }

        let mut alive = flush(&tx, &mut out);
        while alive && !decoder.closed && !closed.is_aborted() {
            let event = tokio::select! {
                _ = closed.aborted() => break,
                event = events.recv() => event,
            };
            match event {
                Some(BusEvent::Message(message)) => {
                    decoder.route_live(&message, &mut out);
                }
                Some(BusEvent::Failed { reason }) => {
                    decoder.fail(&reason, &mut out);
                }
                None => break,
            }
            alive = flush(&tx, &mut out);
        }
        closed.abort();
        channel.unsubscribe(subscription.id);
    });

    ChunkStream {
        inner: UnboundedReceiverStream::new(rx),
        handle,
    }
}

fn flush(
    tx: &mpsc::UnboundedSender<Result<UiChunk, TransportError>>,
    out: &mut Vec<UiChunk>,
) -> bool {
    for chunk in out.drain(..) {
        if tx.send(Ok(chunk)).is_err() {
            return false;
        }
    }
    true
}

// ============================================================================
// Decoder
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackKind {
    Text,
    Reasoning,
    ToolInput,
}

/// Bookkeeping for one in-progress logical chunk, keyed by bus serial.
struct SerialTracker {
    kind: TrackKind,
    id: String,
    tool_name: Option<String>,
    /// Full payload seen so far; conflated updates are diffed against it.
    accumulated: String,
}

pub(crate) struct ChunkDecoder {
    prompt_id: Option<String>,
    trackers: HashMap<String, SerialTracker>,
    has_emitted_start: bool,
    has_emitted_step_start: bool,
    pub(crate) closed: bool,
}

impl ChunkDecoder {
    pub(crate) fn new(prompt_id: Option<String>) -> Self {
        Self {
            prompt_id,
            trackers: HashMap::new(),
            has_emitted_start: false,
            has_emitted_step_start: false,
            closed: false,
        }
    }

    fn accept(&self, message: &InboundMessage) -> bool {
        if self.closed {
            return false;
        }
        // Echoes of the subscriber's own writes on the shared channel.
        if wire::is_client_event(&message.name) {
            return false;
        }
        if let Some(expected) = &self.prompt_id {
            if message.prompt_id() != Some(expected.as_str()) {
                return false;
            }
        }
        true
    }

    pub(crate) fn fail(&mut self, reason: &str, out: &mut Vec<UiChunk>) {
        if self.closed {
            return;
        }
        out.push(UiChunk::Error {
            error_text: format!("Channel error: {}", reason),
        });
        self.closed = true;
    }

    pub(crate) fn route_live(&mut self, message: &InboundMessage, out: &mut Vec<UiChunk>) {
        if !self.accept(message) {
            return;
        }
        match message.action {
            crate::bus::BusAction::Create => self.on_create(message, out),
            crate::bus::BusAction::Append => self.on_append(message, out),
            crate::bus::BusAction::Update => self.on_update(message, out),
        }
    }

    /// Emit `start` / `start-step` ahead of the first content chunk. The
    /// publish side never puts them on the wire.
    fn push_content(&mut self, chunk: UiChunk, out: &mut Vec<UiChunk>) {
        if !self.has_emitted_start {
            self.has_emitted_start = true;
            out.push(UiChunk::start());
        }
        if !self.has_emitted_step_start {
            self.has_emitted_step_start = true;
            out.push(UiChunk::StartStep);
        }
        out.push(chunk);
    }

    // ---- create ----

    fn on_create(&mut self, message: &InboundMessage, out: &mut Vec<UiChunk>) {
        match wire::parse_label(&message.name) {
            wire::Label::Text(id) => {
                self.trackers.insert(
                    message.serial.clone(),
                    SerialTracker {
                        kind: TrackKind::Text,
                        id: id.to_string(),
                        tool_name: None,
                        accumulated: String::new(),
                    },
                );
                self.push_content(
                    UiChunk::TextStart {
                        id: id.to_string(),
                        provider_metadata: message.json_header("providerMetadata"),
                    },
                    out,
                );
            }
            wire::Label::Reasoning(id) => {
                self.trackers.insert(
                    message.serial.clone(),
                    SerialTracker {
                        kind: TrackKind::Reasoning,
                        id: id.to_string(),
                        tool_name: None,
                        accumulated: String::new(),
                    },
                );
                self.push_content(
                    UiChunk::ReasoningStart {
                        id: id.to_string(),
                        provider_metadata: message.json_header("providerMetadata"),
                    },
                    out,
                );
            }
            wire::Label::Tool {
                tool_call_id,
                tool_name,
            } => {
                self.trackers.insert(
                    message.serial.clone(),
                    SerialTracker {
                        kind: TrackKind::ToolInput,
                        id: tool_call_id.to_string(),
                        tool_name: Some(tool_name.to_string()),
                        accumulated: message.data.clone(),
                    },
                );
                if message.header(HEADER_EVENT) == Some(wire::TOOL_INPUT_AVAILABLE) {
                    // Non-streaming tool: the create already carries the
                    // full input; no start/delta chunks are emitted.
                    self.push_content(
                        UiChunk::ToolInputAvailable {
                            tool_call_id: tool_call_id.to_string(),
                            tool_name: tool_name.to_string(),
                            input: parse_tool_input(&message.data),
                            dynamic: bool_header(message, "dynamic"),
                            title: message.header("title").map(String::from),
                            provider_executed: bool_header(message, "providerExecuted"),
                        },
                        out,
                    );
                } else {
                    self.push_content(
                        UiChunk::ToolInputStart {
                            tool_call_id: tool_call_id.to_string(),
                            tool_name: tool_name.to_string(),
                            dynamic: bool_header(message, "dynamic"),
                            title: message.header("title").map(String::from),
                            provider_executed: bool_header(message, "providerExecuted"),
                        },
                        out,
                    );
                }
            }
            label => {
                self.on_control(label, message, out);
            }
        }
    }

    /// Labels shared between the live create handler and history replay.
    fn on_control(&mut self, label: wire::Label<'_>, message: &InboundMessage, out: &mut Vec<UiChunk>) {
        let body = parse_body(&message.data);
        match label {
            wire::Label::Start => {
                self.has_emitted_start = true;
                out.push(UiChunk::Start {
                    message_id: opt_string(&body, "messageId"),
                    message_metadata: opt_value(&body, "messageMetadata"),
                });
            }
            wire::Label::StepFinish => {
                out.push(UiChunk::FinishStep);
                self.has_emitted_step_start = false;
            }
            wire::Label::Finish => {
                out.push(UiChunk::Finish {
                    finish_reason: parse_finish_reason(&body),
                    message_metadata: opt_value(&body, "messageMetadata"),
                });
                self.closed = true;
            }
            wire::Label::Error => {
                out.push(UiChunk::Error {
                    error_text: opt_string(&body, "errorText")
                        .unwrap_or_else(|| "unknown error".to_string()),
                });
                self.closed = true;
            }
            wire::Label::Abort => {
                out.push(UiChunk::Abort {
                    reason: opt_string(&body, "reason"),
                });
                self.closed = true;
            }
            wire::Label::Metadata => {
                self.push_content(
                    UiChunk::MessageMetadata {
                        message_metadata: opt_value(&body, "messageMetadata")
                            .unwrap_or(Value::Null),
                    },
                    out,
                );
            }
            wire::Label::ToolApproval(tool_call_id) => {
                self.push_content(
                    UiChunk::ToolApprovalRequest {
                        tool_call_id: tool_call_id.to_string(),
                        approval_id: opt_string(&body, "approvalId").unwrap_or_default(),
                    },
                    out,
                );
            }
            wire::Label::File => {
                self.push_content(
                    UiChunk::File {
                        url: opt_string(&body, "url").unwrap_or_default(),
                        media_type: opt_string(&body, "mediaType").unwrap_or_default(),
                    },
                    out,
                );
            }
            wire::Label::SourceUrl => {
                self.push_content(
                    UiChunk::SourceUrl {
                        source_id: opt_string(&body, "sourceId").unwrap_or_default(),
                        url: opt_string(&body, "url").unwrap_or_default(),
                        title: opt_string(&body, "title"),
                    },
                    out,
                );
            }
            wire::Label::SourceDocument => {
                self.push_content(
                    UiChunk::SourceDocument {
                        source_id: opt_string(&body, "sourceId").unwrap_or_default(),
                        media_type: opt_string(&body, "mediaType").unwrap_or_default(),
                        title: opt_string(&body, "title").unwrap_or_default(),
                        filename: opt_string(&body, "filename"),
                    },
                    out,
                );
            }
            wire::Label::Data(name) => {
                // A missing `data` field still produces a chunk.
                self.push_content(
                    UiChunk::Data {
                        name: name.to_string(),
                        data: opt_value(&body, "data").unwrap_or(Value::Null),
                        id: opt_string(&body, "id"),
                        transient: message.ephemeral.then_some(true),
                    },
                    out,
                );
            }
            other => {
                // Unknown labels are ignored for forward compatibility.
                log::debug!("ignoring message with unhandled label {:?}", other);
            }
        }
    }

    // ---- append ----

    fn on_append(&mut self, message: &InboundMessage, out: &mut Vec<UiChunk>) {
        if !self.ensure_tracker(message, out) {
            return;
        }
        self.apply_delta(message, &message.data, false, out);
        self.apply_end_event(message, out);
    }

    // ---- update ----

    fn on_update(&mut self, message: &InboundMessage, out: &mut Vec<UiChunk>) {
        match wire::parse_label(&message.name) {
            wire::Label::ToolOutput(tool_call_id) => {
                let body = parse_body(&message.data);
                self.push_content(
                    UiChunk::ToolOutputAvailable {
                        tool_call_id: tool_call_id.to_string(),
                        output: opt_value(&body, "output").unwrap_or(Value::Null),
                        dynamic: opt_bool(&body, "dynamic"),
                        provider_executed: opt_bool(&body, "providerExecuted"),
                        preliminary: opt_bool(&body, "preliminary"),
                    },
                    out,
                );
                self.trackers.remove(&message.serial);
            }
            wire::Label::ToolError(tool_call_id) => {
                let body = parse_body(&message.data);
                self.push_content(
                    UiChunk::ToolOutputError {
                        tool_call_id: tool_call_id.to_string(),
                        error_text: opt_string(&body, "errorText")
                            .unwrap_or_else(|| "unknown error".to_string()),
                        dynamic: opt_bool(&body, "dynamic"),
                    },
                    out,
                );
                self.trackers.remove(&message.serial);
            }
            wire::Label::ToolDenied(tool_call_id) => {
                self.push_content(
                    UiChunk::ToolOutputDenied {
                        tool_call_id: tool_call_id.to_string(),
                    },
                    out,
                );
                self.trackers.remove(&message.serial);
            }
            _ => {
                // Conflation: appends coalesced into one update whose data
                // carries the accumulated payload.
                if !self.ensure_tracker(message, out) {
                    return;
                }
                self.apply_delta(message, &message.data, true, out);
                self.apply_end_event(message, out);
            }
        }
    }

    // ---- shared tracker plumbing ----

    /// Look up the tracker for this serial, synthesizing it (and the
    /// missing `*-start`) from the message name for orphans whose create
    /// was consumed by history. Returns false when the name gives no way
    /// to track the message.
    fn ensure_tracker(&mut self, message: &InboundMessage, out: &mut Vec<UiChunk>) -> bool {
        if self.trackers.contains_key(&message.serial) {
            return true;
        }
        match wire::parse_label(&message.name) {
            wire::Label::Text(id) => {
                self.trackers.insert(
                    message.serial.clone(),
                    SerialTracker {
                        kind: TrackKind::Text,
                        id: id.to_string(),
                        tool_name: None,
                        accumulated: String::new(),
                    },
                );
                self.push_content(
                    UiChunk::TextStart {
                        id: id.to_string(),
                        provider_metadata: None,
                    },
                    out,
                );
                true
            }
            wire::Label::Reasoning(id) => {
                self.trackers.insert(
                    message.serial.clone(),
                    SerialTracker {
                        kind: TrackKind::Reasoning,
                        id: id.to_string(),
                        tool_name: None,
                        accumulated: String::new(),
                    },
                );
                self.push_content(
                    UiChunk::ReasoningStart {
                        id: id.to_string(),
                        provider_metadata: None,
                    },
                    out,
                );
                true
            }
            wire::Label::Tool {
                tool_call_id,
                tool_name,
            } => {
                self.trackers.insert(
                    message.serial.clone(),
                    SerialTracker {
                        kind: TrackKind::ToolInput,
                        id: tool_call_id.to_string(),
                        tool_name: Some(tool_name.to_string()),
                        accumulated: String::new(),
                    },
                );
                self.push_content(
                    UiChunk::ToolInputStart {
                        tool_call_id: tool_call_id.to_string(),
                        tool_name: tool_name.to_string(),
                        dynamic: None,
                        title: None,
                        provider_executed: None,
                    },
                    out,
                );
                true
            }
            _ => {
                log::debug!("append/update for untrackable name '{}'", message.name);
                false
            }
        }
    }

    /// Turn new payload into the appropriate `*-delta` chunk. For appends
    /// `data` is the delta itself; for conflated updates it is the full
    /// accumulated payload and the tracker prefix is sliced off. Updates
    /// whose payload is shorter than the accumulated prefix are ignored
    /// (growth is monotonic).
    fn apply_delta(
        &mut self,
        message: &InboundMessage,
        data: &str,
        accumulated_payload: bool,
        out: &mut Vec<UiChunk>,
    ) {
        let chunk = {
            let Some(tracker) = self.trackers.get_mut(&message.serial) else {
                return;
            };
            let delta = if accumulated_payload {
                match data.get(tracker.accumulated.len()..) {
                    Some(rest) if !rest.is_empty() => {
                        let rest = rest.to_string();
                        tracker.accumulated = data.to_string();
                        rest
                    }
                    _ => return,
                }
            } else {
                if data.is_empty() {
                    return;
                }
                tracker.accumulated.push_str(data);
                data.to_string()
            };
            match tracker.kind {
                TrackKind::Text => UiChunk::TextDelta {
                    id: tracker.id.clone(),
                    delta,
                },
                TrackKind::Reasoning => UiChunk::ReasoningDelta {
                    id: tracker.id.clone(),
                    delta,
                },
                TrackKind::ToolInput => UiChunk::ToolInputDelta {
                    tool_call_id: tracker.id.clone(),
                    input_text_delta: delta,
                },
            }
        };
        self.push_content(chunk, out);
    }

    /// Handle a `*-end` sub-event: emit the terminator chunk and retire the
    /// tracker. Tool-input trackers survive, since the same serial is
    /// reused for the later output/error update.
    fn apply_end_event(&mut self, message: &InboundMessage, out: &mut Vec<UiChunk>) {
        let Some(event) = message.event.as_deref() else {
            return;
        };
        if !event.ends_with("-end") {
            return;
        }
        let (kind, id, tool_name, accumulated) = {
            let Some(tracker) = self.trackers.get(&message.serial) else {
                return;
            };
            (
                tracker.kind,
                tracker.id.clone(),
                tracker.tool_name.clone(),
                tracker.accumulated.clone(),
            )
        };
        match kind {
            TrackKind::Text => {
                self.trackers.remove(&message.serial);
                self.push_content(UiChunk::TextEnd { id }, out);
            }
            TrackKind::Reasoning => {
                self.trackers.remove(&message.serial);
                self.push_content(UiChunk::ReasoningEnd { id }, out);
            }
            TrackKind::ToolInput => {
                let chunk = UiChunk::ToolInputAvailable {
                    tool_call_id: id,
                    tool_name: tool_name.unwrap_or_default(),
                    input: parse_tool_input(&accumulated),
                    dynamic: None,
                    title: None,
                    provider_executed: None,
                };
                self.push_content(chunk, out);
            }
        }
    }

    // ---- history replay ----

    /// Replay one historical message, emitting every chunk needed to
    /// reconstruct its final state in one shot. Messages still mid-stream
    /// register a tracker so live appends continue them seamlessly.
    pub(crate) fn route_history(&mut self, message: &InboundMessage, out: &mut Vec<UiChunk>) {
        if !self.accept(message) {
            return;
        }
        match wire::parse_label(&message.name) {
            wire::Label::Text(id) => {
                self.push_content(
                    UiChunk::TextStart {
                        id: id.to_string(),
                        provider_metadata: message.json_header("providerMetadata"),
                    },
                    out,
                );
                if !message.data.is_empty() {
                    self.push_content(
                        UiChunk::TextDelta {
                            id: id.to_string(),
                            delta: message.data.clone(),
                        },
                        out,
                    );
                }
                if message.event.as_deref() == Some(wire::TEXT_END) {
                    self.push_content(UiChunk::TextEnd { id: id.to_string() }, out);
                } else {
                    self.trackers.insert(
                        message.serial.clone(),
                        SerialTracker {
                            kind: TrackKind::Text,
                            id: id.to_string(),
                            tool_name: None,
                            accumulated: message.data.clone(),
                        },
                    );
                }
            }
            wire::Label::Reasoning(id) => {
                self.push_content(
                    UiChunk::ReasoningStart {
                        id: id.to_string(),
                        provider_metadata: message.json_header("providerMetadata"),
                    },
                    out,
                );
                if !message.data.is_empty() {
                    self.push_content(
                        UiChunk::ReasoningDelta {
                            id: id.to_string(),
                            delta: message.data.clone(),
                        },
                        out,
                    );
                }
                if message.event.as_deref() == Some(wire::REASONING_END) {
                    self.push_content(UiChunk::ReasoningEnd { id: id.to_string() }, out);
                } else {
                    self.trackers.insert(
                        message.serial.clone(),
                        SerialTracker {
                            kind: TrackKind::Reasoning,
                            id: id.to_string(),
                            tool_name: None,
                            accumulated: message.data.clone(),
                        },
                    );
                }
            }
            wire::Label::Tool {
                tool_call_id,
                tool_name,
            } => {
                // The serial stays tracked either way: the tool's output
                // arrives later as an update on the same message.
                self.trackers.insert(
                    message.serial.clone(),
                    SerialTracker {
                        kind: TrackKind::ToolInput,
                        id: tool_call_id.to_string(),
                        tool_name: Some(tool_name.to_string()),
                        accumulated: message.data.clone(),
                    },
                );
                if message.header(HEADER_EVENT) == Some(wire::TOOL_INPUT_AVAILABLE) {
                    self.push_content(
                        UiChunk::ToolInputAvailable {
                            tool_call_id: tool_call_id.to_string(),
                            tool_name: tool_name.to_string(),
                            input: parse_tool_input(&message.data),
                            dynamic: bool_header(message, "dynamic"),
                            title: message.header("title").map(String::from),
                            provider_executed: bool_header(message, "providerExecuted"),
                        },
                        out,
                    );
                    return;
                }
                self.push_content(
                    UiChunk::ToolInputStart {
                        tool_call_id: tool_call_id.to_string(),
                        tool_name: tool_name.to_string(),
                        dynamic: bool_header(message, "dynamic"),
                        title: message.header("title").map(String::from),
                        provider_executed: bool_header(message, "providerExecuted"),
                    },
                    out,
                );
                if !message.data.is_empty() {
                    self.push_content(
                        UiChunk::ToolInputDelta {
                            tool_call_id: tool_call_id.to_string(),
                            input_text_delta: message.data.clone(),
                        },
                        out,
                    );
                }
                if message.event.as_deref() == Some(wire::TOOL_INPUT_END) {
                    self.push_content(
                        UiChunk::ToolInputAvailable {
                            tool_call_id: tool_call_id.to_string(),
                            tool_name: tool_name.to_string(),
                            input: parse_tool_input(&message.data),
                            dynamic: None,
                            title: None,
                            provider_executed: None,
                        },
                        out,
                    );
                }
            }
            // Already-finalized tools: the update replaced the message, so
            // only the result survives into history.
            wire::Label::ToolOutput(tool_call_id) => {
                let body = parse_body(&message.data);
                self.push_content(
                    UiChunk::ToolOutputAvailable {
                        tool_call_id: tool_call_id.to_string(),
                        output: opt_value(&body, "output").unwrap_or(Value::Null),
                        dynamic: opt_bool(&body, "dynamic"),
                        provider_executed: opt_bool(&body, "providerExecuted"),
                        preliminary: opt_bool(&body, "preliminary"),
                    },
                    out,
                );
            }
            wire::Label::ToolError(tool_call_id) => {
                let body = parse_body(&message.data);
                self.push_content(
                    UiChunk::ToolOutputError {
                        tool_call_id: tool_call_id.to_string(),
                        error_text: opt_string(&body, "errorText")
                            .unwrap_or_else(|| "unknown error".to_string()),
                        dynamic: opt_bool(&body, "dynamic"),
                    },
                    out,
                );
            }
            wire::Label::ToolDenied(tool_call_id) => {
                self.push_content(
                    UiChunk::ToolOutputDenied {
                        tool_call_id: tool_call_id.to_string(),
                    },
                    out,
                );
            }
            label => self.on_control(label, message, out),
        }
    }
}

// ============================================================================
// Body decoding helpers
// ============================================================================

fn parse_body(data: &str) -> Value {
    serde_json::from_str(data).unwrap_or(Value::Null)
}

/// Tool inputs keep a partial stream interpretable: malformed JSON is
/// surfaced as the literal string instead of being dropped.
fn parse_tool_input(data: &str) -> Value {
    serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()))
}

fn parse_finish_reason(body: &Value) -> FinishReason {
    body.get("finishReason")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or(FinishReason::Unknown)
}

fn opt_string(body: &Value, key: &str) -> Option<String> {
    body.get(key)?.as_str().map(String::from)
}

fn opt_bool(body: &Value, key: &str) -> Option<bool> {
    body.get(key)?.as_bool()
}

fn opt_value(body: &Value, key: &str) -> Option<Value> {
    body.get(key).cloned()
}

fn bool_header(message: &InboundMessage, key: &str) -> Option<bool> {
    message.header(key).and_then(|raw| raw.parse().ok())
}
