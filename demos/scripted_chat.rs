// Example: end-to-end chat over the in-memory bus
//
// This demonstrates:
// - Hosting a conversation session with a scripted handler
// - Sending a user message through the client transport
// - Streaming the reply chunks as they decode
// - Loading the reconstructed history afterwards
//
// Run with:
//   cargo run --example scripted_chat

use chatbus::chat::{BoxChunkStream, ChatHandler, ChatRequest};
use chatbus::{
    host_session, ChatMessage, ChatRole, ChatTrigger, ClientTransport, FinishReason, MemoryBus,
    SendOptions, SessionOptions, UiChunk,
};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn scripted_handler() -> ChatHandler {
    Arc::new(|request: ChatRequest| {
        Box::pin(async move {
            let prompt = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::User)
                .map(|m| m.text())
                .unwrap_or_default();
            let reply = format!("You said \"{}\" — noted, and replied to in full.", prompt);

            let stream = async_stream::stream! {
                yield Ok(UiChunk::TextStart {
                    id: "t0".into(),
                    provider_metadata: None,
                });
                for word in reply.split_inclusive(' ') {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    yield Ok(UiChunk::TextDelta {
                        id: "t0".into(),
                        delta: word.to_string(),
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    simplelog::SimpleLogger::init(log::LevelFilter::Info, simplelog::Config::default())?;

    let bus = Arc::new(MemoryBus::new());
    let session = host_session(bus.clone(), scripted_handler(), SessionOptions::new()).await?;
    let transport = ClientTransport::new(bus.clone());

    println!("── sending message ──");
    let mut stream = transport
        .send_messages(
            ChatTrigger::SubmitMessage,
            SendOptions::new().with_messages(vec![ChatMessage::user_text("m1", "hello bus")]),
        )
        .await?;

    print!("🤖 ");
    while let Some(chunk) = stream.next().await {
        match chunk? {
            UiChunk::TextDelta { delta, .. } => {
                print!("{}", delta);
                std::io::stdout().flush()?;
            }
            UiChunk::Finish { finish_reason, .. } => {
                println!("\n── finished: {:?} ──", finish_reason);
            }
            _ => {}
        }
    }

    let history = transport.load_chat_history(None).await?;
    println!("history holds {} messages:", history.messages.len());
    for message in &history.messages {
        println!("  [{:?}] {}", message.role, message.text());
    }

    session.cleanup().await;
    Ok(())
}
