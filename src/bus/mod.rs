// Bus abstraction
// One ordered pub/sub channel per conversation: create / append / update,
// history bounded at the attach point, and presence.

pub mod channel;
pub mod memory;
pub mod types;

pub use channel::{BusChannel, BusError, Subscription};
pub use memory::MemoryBus;
pub use types::{
    BusAction, BusEvent, HistoryOptions, InboundMessage, OutboundMessage, PresenceAction,
    PresenceEvent, PresenceMember, HEADER_EVENT, HEADER_PROMPT_ID, HEADER_ROLE, ROLE_ASSISTANT,
    ROLE_USER,
};
