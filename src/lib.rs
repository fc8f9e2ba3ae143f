pub mod abort;
pub mod bus;
pub mod chat;

// Re-export commonly used items for convenience
pub use abort::AbortHandle;
pub use bus::{BusChannel, BusError, InboundMessage, MemoryBus, OutboundMessage};
pub use chat::{
    host_session, publish_chunks, resume_stream, ChatHandler, ChatHistory, ChatMessage, ChatRole,
    ChatTrigger, ChunkStream, ClientTransport, FinishReason, MessagePart, PublishOptions,
    ResumeOptions, SendOptions, SessionOptions, TransportError, UiChunk,
};
