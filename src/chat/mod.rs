// Streaming-chat transport
// Encodes a UI chunk stream onto bus messages and decodes it back on every
// subscriber, with history replay, conflation recovery and per-channel
// conversation sessions on top.

pub mod accumulate;
pub mod chunk;
pub mod client;
pub mod history;
pub mod message;
pub mod presence;
pub mod publish;
pub mod replay;
pub mod session;
pub mod subscribe;
pub mod wire;

#[cfg(test)]
mod tests;

// Re-export main types
pub use accumulate::{accumulate_chunks, ChunkAccumulator};
pub use chunk::{BoxChunkStream, FinishReason, TransportError, UiChunk};
pub use client::{ClientTransport, SendOptions};
pub use history::{reconstruct_messages, ChatHistory};
pub use message::{ChatMessage, ChatRole, ChatTrigger, MessagePart, ToolState};
pub use presence::{watch_agent_presence, PresenceWatch};
pub use publish::{publish_chunks, PublishError, PublishOptions};
pub use replay::{resume_stream, ResumeOptions};
pub use session::{
    host_session, ChatHandler, ChatRequest, PresenceConfig, SessionHandle, SessionOptions,
};
pub use subscribe::{open_stream, ChunkStream, StreamHandle, SubscribeOptions};
