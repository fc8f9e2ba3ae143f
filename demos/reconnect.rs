// Example: late-join replay
//
// A generation is already streaming when a second viewer attaches. The
// viewer replays the history window, flushes the buffered live messages,
// and continues live — the output is identical to what a viewer present
// from the start would have seen.
//
// Run with:
//   cargo run --example reconnect

use chatbus::{
    publish_chunks, resume_stream, FinishReason, MemoryBus, PublishOptions, ResumeOptions, UiChunk,
};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = Arc::new(MemoryBus::new());

    // A slow generation, published in the background.
    let publisher = {
        let bus = bus.clone();
        tokio::spawn(async move {
            let text = "The quick brown fox jumps over the lazy dog. ";
            let stream = async_stream::stream! {
                yield Ok::<_, chatbus::TransportError>(UiChunk::TextStart {
                    id: "t0".into(),
                    provider_metadata: None,
                });
                for word in text.split_inclusive(' ') {
                    tokio::time::sleep(Duration::from_millis(150)).await;
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
            publish_chunks(bus, stream, PublishOptions::new()).await
        })
    };

    // Join mid-stream.
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("── late viewer attaching ──");

    let Some(mut stream) = resume_stream(bus.clone(), ResumeOptions::default()).await? else {
        println!("no active stream to resume");
        return Ok(());
    };

    while let Some(chunk) = stream.next().await {
        match chunk? {
            UiChunk::TextStart { .. } => print!("🤖 "),
            UiChunk::TextDelta { delta, .. } => {
                print!("{}", delta);
                std::io::stdout().flush()?;
            }
            UiChunk::Finish { .. } => println!("\n── stream complete ──"),
            _ => {}
        }
    }

    publisher.await??;
    Ok(())
}
