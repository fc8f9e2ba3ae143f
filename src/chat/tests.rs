#[cfg(test)]
mod tests {
    use crate::abort::AbortHandle;
    use crate::bus::{
        BusChannel, MemoryBus, OutboundMessage, HEADER_PROMPT_ID, HEADER_ROLE, ROLE_ASSISTANT,
    };
    use crate::chat::chunk::{BoxChunkStream, FinishReason, TransportError, UiChunk};
    use crate::chat::client::{ClientTransport, SendOptions};
    use crate::chat::message::{ChatMessage, ChatRole, ChatTrigger};
    use crate::chat::publish::{publish_chunks, PublishOptions};
    use crate::chat::replay::{resume_stream, ResumeOptions};
    use crate::chat::session::{
        host_session, ChatHandler, ChatRequest, PresenceConfig, SessionOptions,
    };
    use crate::chat::subscribe::{open_stream, ChunkStream, SubscribeOptions};
    use crate::chat::wire;
    use futures::{Stream, StreamExt};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn chunk_stream(
        chunks: Vec<UiChunk>,
    ) -> impl Stream<Item = Result<UiChunk, TransportError>> + Send {
        futures::stream::iter(chunks.into_iter().map(Ok))
    }

    async fn collect(stream: ChunkStream) -> Vec<UiChunk> {
        stream
            .map(|item| item.expect("stream item"))
            .collect::<Vec<_>>()
            .await
    }

    fn assistant_event(name: &str, data: &str) -> OutboundMessage {
        OutboundMessage::new(name, data).with_header(HEADER_ROLE, ROLE_ASSISTANT)
    }

    fn text_start(id: &str) -> UiChunk {
        UiChunk::TextStart {
            id: id.into(),
            provider_metadata: None,
        }
    }

    fn text_delta(id: &str, delta: &str) -> UiChunk {
        UiChunk::TextDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    fn finish() -> UiChunk {
        UiChunk::Finish {
            finish_reason: FinishReason::Stop,
            message_metadata: None,
        }
    }

    /// Streams "reply to: <last user text>" one character at a time.
    fn echo_handler(delay_ms: u64) -> ChatHandler {
        Arc::new(move |request: ChatRequest| {
            Box::pin(async move {
                let prompt = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == ChatRole::User)
                    .map(|m| m.text())
                    .unwrap_or_default();
                let text = format!("reply to: {}", prompt);
                let stream = async_stream::stream! {
                    yield Ok(UiChunk::TextStart {
                        id: "t0".into(),
                        provider_metadata: None,
                    });
                    for ch in text.chars() {
                        if delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        }
                        yield Ok(UiChunk::TextDelta {
                            id: "t0".into(),
                            delta: ch.to_string(),
                        });
                    }
                    yield Ok(UiChunk::TextEnd { id: "t0".into() });
                    yield Ok(UiChunk::FinishStep);
                    yield Ok(UiChunk::Finish {
                        finish_reason: FinishReason::Stop,
                        message_metadata: None,
                    });
                };
                Ok(Box::pin(stream) as BoxChunkStream)
            })
        })
    }

    fn deltas_concat(chunks: &[UiChunk]) -> String {
        chunks
            .iter()
            .filter_map(|chunk| match chunk {
                UiChunk::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Round-trip laws
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_round_trip_simple_text() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        let input = vec![
            UiChunk::start(),
            UiChunk::StartStep,
            text_start("t0"),
            text_delta("t0", "Hello"),
            text_delta("t0", ", world!"),
            UiChunk::TextEnd { id: "t0".into() },
            UiChunk::FinishStep,
            finish(),
        ];
        publish_chunks(bus.clone(), chunk_stream(input.clone()), PublishOptions::new())
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn test_round_trip_streaming_tool() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        let input = vec![
            UiChunk::start(),
            UiChunk::StartStep,
            UiChunk::ToolInputStart {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                dynamic: None,
                title: None,
                provider_executed: None,
            },
            UiChunk::ToolInputDelta {
                tool_call_id: "c1".into(),
                input_text_delta: "{\"q\":".into(),
            },
            UiChunk::ToolInputDelta {
                tool_call_id: "c1".into(),
                input_text_delta: "\"ai\"}".into(),
            },
            UiChunk::ToolInputAvailable {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                input: json!({"q": "ai"}),
                dynamic: None,
                title: None,
                provider_executed: None,
            },
            UiChunk::ToolOutputAvailable {
                tool_call_id: "c1".into(),
                output: json!({"results": ["r1"]}),
                dynamic: None,
                provider_executed: None,
                preliminary: None,
            },
            UiChunk::FinishStep,
            finish(),
        ];
        publish_chunks(bus.clone(), chunk_stream(input.clone()), PublishOptions::new())
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn test_non_streaming_tool_emits_available_only() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        let input = vec![
            UiChunk::ToolInputAvailable {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                input: json!({"q": "ai"}),
                dynamic: None,
                title: None,
                provider_executed: None,
            },
            finish(),
        ];
        publish_chunks(bus.clone(), chunk_stream(input.clone()), PublishOptions::new())
            .await
            .unwrap();

        let output = collect(stream).await;
        assert!(!output
            .iter()
            .any(|chunk| matches!(chunk, UiChunk::ToolInputStart { .. })));
        assert!(output.iter().any(|chunk| matches!(
            chunk,
            UiChunk::ToolInputAvailable { tool_call_id, .. } if tool_call_id == "c1"
        )));
    }

    #[tokio::test]
    async fn test_multi_step_synthesizes_step_starts() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        let input = vec![
            UiChunk::start(),
            UiChunk::StartStep,
            text_start("t0"),
            text_delta("t0", "step one"),
            UiChunk::TextEnd { id: "t0".into() },
            UiChunk::FinishStep,
            UiChunk::StartStep,
            text_start("t1"),
            text_delta("t1", "step two"),
            UiChunk::TextEnd { id: "t1".into() },
            UiChunk::FinishStep,
            finish(),
        ];
        publish_chunks(bus.clone(), chunk_stream(input.clone()), PublishOptions::new())
            .await
            .unwrap();

        // The second start-step is reconstructed after finish-step even
        // though the wire never carries step delimiters.
        let output = collect(stream).await;
        assert_eq!(output, input);
    }

    // ------------------------------------------------------------------
    // Conflation laws
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_full_conflation_single_delta() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::conflating(0));
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        let input = vec![
            UiChunk::start(),
            UiChunk::StartStep,
            text_start("t0"),
            text_delta("t0", "A"),
            text_delta("t0", "B"),
            UiChunk::TextEnd { id: "t0".into() },
            UiChunk::FinishStep,
            finish(),
        ];
        publish_chunks(bus.clone(), chunk_stream(input), PublishOptions::new())
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(
            output,
            vec![
                UiChunk::start(),
                UiChunk::StartStep,
                text_start("t0"),
                text_delta("t0", "AB"),
                UiChunk::TextEnd { id: "t0".into() },
                UiChunk::FinishStep,
                finish(),
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_conflation_preserves_concatenation() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::conflating(1));
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        let input = vec![
            text_start("t0"),
            text_delta("t0", "A"),
            text_delta("t0", "B"),
            text_delta("t0", "C"),
            UiChunk::TextEnd { id: "t0".into() },
            finish(),
        ];
        publish_chunks(bus.clone(), chunk_stream(input), PublishOptions::new())
            .await
            .unwrap();

        let output = collect(stream).await;
        // However the bus split the run, the concatenation is intact.
        assert_eq!(deltas_concat(&output), "ABC");
        assert!(output
            .iter()
            .any(|chunk| matches!(chunk, UiChunk::TextEnd { .. })));
    }

    // ------------------------------------------------------------------
    // Reconnect / replay
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_reconnect_mid_stream_replays_then_continues() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());

        let serial = bus.publish(assistant_event("text:t0", "")).await.unwrap();
        bus.append(&serial, "Hello wor".into(), Some(wire::TEXT_DELTA.into()))
            .await
            .unwrap();

        let stream = resume_stream(bus.clone(), ResumeOptions::default())
            .await
            .unwrap()
            .expect("active stream");

        bus.append(&serial, "ld!".into(), Some(wire::TEXT_DELTA.into()))
            .await
            .unwrap();
        bus.append(&serial, "".into(), Some(wire::TEXT_END.into()))
            .await
            .unwrap();
        bus.publish(assistant_event("step-finish", "{}")).await.unwrap();
        bus.publish(assistant_event("finish", "{\"finishReason\":\"stop\"}"))
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(
            output,
            vec![
                UiChunk::start(),
                UiChunk::StartStep,
                text_start("t0"),
                text_delta("t0", "Hello wor"),
                text_delta("t0", "ld!"),
                UiChunk::TextEnd { id: "t0".into() },
                UiChunk::FinishStep,
                finish(),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnect_with_empty_history_is_none() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let resumed = resume_stream(bus, ResumeOptions::default()).await.unwrap();
        assert!(resumed.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_after_terminal_is_none() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        bus.publish(assistant_event("text:t0", "done")).await.unwrap();
        bus.publish(assistant_event("finish", "{\"finishReason\":\"stop\"}"))
            .await
            .unwrap();

        let resumed = resume_stream(bus, ResumeOptions::default()).await.unwrap();
        assert!(resumed.is_none());
    }

    #[tokio::test]
    async fn test_orphan_append_synthesizes_start() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());

        let serial = bus.publish(assistant_event("text:t0", "")).await.unwrap();
        bus.append(&serial, "Hel".into(), Some(wire::TEXT_DELTA.into()))
            .await
            .unwrap();
        bus.publish(assistant_event("metadata", "{}")).await.unwrap();

        // The history window is capped to 1 item, so the text create falls
        // outside it and the live appends arrive orphaned.
        let stream = resume_stream(bus.clone(), ResumeOptions::default().with_history_limit(1))
            .await
            .unwrap()
            .expect("active stream");

        bus.append(&serial, "lo".into(), Some(wire::TEXT_DELTA.into()))
            .await
            .unwrap();
        bus.append(&serial, "".into(), Some(wire::TEXT_END.into()))
            .await
            .unwrap();
        bus.publish(assistant_event("finish", "{\"finishReason\":\"stop\"}"))
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(
            output,
            vec![
                UiChunk::start(),
                UiChunk::StartStep,
                UiChunk::MessageMetadata {
                    message_metadata: serde_json::Value::Null,
                },
                text_start("t0"),
                text_delta("t0", "lo"),
                UiChunk::TextEnd { id: "t0".into() },
                finish(),
            ]
        );
    }

    // ------------------------------------------------------------------
    // Subscribe-side robustness
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_subscriber_emits_one_terminal() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        bus.publish(assistant_event("finish", "{\"finishReason\":\"stop\"}"))
            .await
            .unwrap();
        bus.publish(assistant_event("error", "{\"errorText\":\"late\"}"))
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(output, vec![finish()]);
    }

    #[tokio::test]
    async fn test_unknown_labels_are_ignored() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        bus.publish(assistant_event("hologram", "{}")).await.unwrap();
        bus.publish(assistant_event("finish", "{\"finishReason\":\"stop\"}"))
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(output, vec![finish()]);
    }

    #[tokio::test]
    async fn test_channel_failure_surfaces_as_error_chunk() {
        let bus = Arc::new(MemoryBus::new());
        let channel: Arc<dyn BusChannel> = bus.clone();
        let stream = open_stream(channel, SubscribeOptions::new()).await.unwrap();

        bus.fail("connection lost");

        let output = collect(stream).await;
        assert_eq!(
            output,
            vec![UiChunk::Error {
                error_text: "Channel error: connection lost".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_data_chunk_with_missing_field_still_emits() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let stream = open_stream(bus.clone(), SubscribeOptions::new())
            .await
            .unwrap();

        bus.publish(assistant_event("data-usage", "{}")).await.unwrap();
        bus.publish(assistant_event("finish", "{\"finishReason\":\"stop\"}"))
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(
            output[2],
            UiChunk::Data {
                name: "usage".into(),
                data: serde_json::Value::Null,
                id: None,
                transient: None,
            }
        );
    }

    // ------------------------------------------------------------------
    // Full stack: session + client
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_send_messages_streams_reply() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let session = host_session(bus.clone(), echo_handler(0), SessionOptions::new())
            .await
            .unwrap();
        let transport = ClientTransport::new(bus.clone());

        let stream = transport
            .send_messages(
                ChatTrigger::SubmitMessage,
                SendOptions::new().with_messages(vec![ChatMessage::user_text("m1", "hello")]),
            )
            .await
            .unwrap();

        let output = collect(stream).await;
        assert_eq!(deltas_concat(&output), "reply to: hello");
        assert_eq!(output.last(), Some(&finish()));

        // The session accumulates the reply after its publish settles.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].text(), "reply to: hello");
        session.cleanup().await;
    }

    #[tokio::test]
    async fn test_prompt_isolation_between_sends() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let session = host_session(bus.clone(), echo_handler(10), SessionOptions::new())
            .await
            .unwrap();
        let transport = ClientTransport::new(bus.clone());

        let stream1 = transport
            .send_messages(
                ChatTrigger::SubmitMessage,
                SendOptions::new().with_messages(vec![ChatMessage::user_text("m1", "one")]),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let stream2 = transport
            .send_messages(
                ChatTrigger::SubmitMessage,
                SendOptions::new().with_messages(vec![
                    ChatMessage::user_text("m1", "one"),
                    ChatMessage::user_text("m2", "two"),
                ]),
            )
            .await
            .unwrap();

        // The superseded stream closed without a terminal and without any
        // chunk of the second generation.
        let output1 = collect(stream1).await;
        assert!(!output1.iter().any(UiChunk::is_terminal));
        assert!(!deltas_concat(&output1).contains("two"));

        let output2 = collect(stream2).await;
        assert_eq!(deltas_concat(&output2), "reply to: two");
        assert_eq!(output2.last(), Some(&finish()));
        session.cleanup().await;
    }

    #[tokio::test]
    async fn test_user_abort_leaves_stream_open_for_terminal() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let session = host_session(bus.clone(), echo_handler(10), SessionOptions::new())
            .await
            .unwrap();
        let transport = ClientTransport::new(bus.clone());

        let abort = AbortHandle::new();
        let stream = transport
            .send_messages(
                ChatTrigger::SubmitMessage,
                SendOptions::new()
                    .with_messages(vec![ChatMessage::user_text("m1", "a long question")])
                    .with_abort(abort.clone()),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        abort.abort();

        let output = collect(stream).await;
        assert_eq!(output.last(), Some(&UiChunk::Abort { reason: None }));
        session.cleanup().await;
    }

    #[tokio::test]
    async fn test_regenerate_replaces_trailing_assistant() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let session = host_session(bus.clone(), echo_handler(0), SessionOptions::new())
            .await
            .unwrap();
        let transport = ClientTransport::new(bus.clone());

        let stream = transport
            .send_messages(
                ChatTrigger::SubmitMessage,
                SendOptions::new().with_messages(vec![ChatMessage::user_text("m1", "hi")]),
            )
            .await
            .unwrap();
        collect(stream).await;

        let stream = transport
            .send_messages(ChatTrigger::RegenerateMessage, SendOptions::new())
            .await
            .unwrap();
        let output = collect(stream).await;
        assert_eq!(deltas_concat(&output), "reply to: hi");

        // One user message, one assistant reply; the regenerated one
        // replaced the original.
        let history = transport.load_chat_history(None).await.unwrap();
        assert!(!history.has_active_stream);
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[0].role, ChatRole::User);
        assert_eq!(history.messages[1].role, ChatRole::Assistant);
        assert_eq!(history.messages[1].text(), "reply to: hi");
        session.cleanup().await;
    }

    #[tokio::test]
    async fn test_session_seeds_from_history() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let body = serde_json::to_string(&ChatMessage::user_text("m1", "earlier")).unwrap();
        bus.publish(
            OutboundMessage::new(wire::CHAT_MESSAGE, body)
                .with_header(HEADER_ROLE, "user")
                .with_header(HEADER_PROMPT_ID, "p0"),
        )
        .await
        .unwrap();
        bus.append(
            &bus.publish(assistant_event("text:t0", "")).await.unwrap(),
            "earlier reply".into(),
            Some(wire::TEXT_END.into()),
        )
        .await
        .unwrap();
        bus.publish(assistant_event("finish", "{\"finishReason\":\"stop\"}"))
            .await
            .unwrap();

        let session = host_session(bus.clone(), echo_handler(0), SessionOptions::new())
            .await
            .unwrap();
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[1].text(), "earlier reply");
        session.cleanup().await;
    }

    #[tokio::test]
    async fn test_load_chat_history_reports_active_stream() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let transport = ClientTransport::new(bus.clone());

        let serial = bus.publish(assistant_event("text:t0", "")).await.unwrap();
        bus.append(&serial, "stream in progress".into(), Some(wire::TEXT_DELTA.into()))
            .await
            .unwrap();

        let history = transport.load_chat_history(None).await.unwrap();
        assert!(history.has_active_stream);
        assert_eq!(history.messages.len(), 1);

        bus.publish(assistant_event("finish", "{\"finishReason\":\"stop\"}"))
            .await
            .unwrap();
        let history = transport.load_chat_history(None).await.unwrap();
        assert!(!history.has_active_stream);
    }

    #[tokio::test]
    async fn test_agent_presence_transitions() {
        let bus: Arc<dyn BusChannel> = Arc::new(MemoryBus::new());
        let transport = ClientTransport::new(bus.clone());

        let seen: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let watch = transport
            .on_agent_presence_change(move |online| sink.lock().unwrap().push(online))
            .await
            .unwrap();

        let session = host_session(
            bus.clone(),
            echo_handler(0),
            SessionOptions::new().with_presence(PresenceConfig::default()),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        session.cleanup().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(seen.lock().unwrap().clone(), vec![false, true, false]);
        watch.stop();
    }
}
