pub mod channel;
pub mod connection;
pub mod crypto;
pub mod events;
pub mod types;

pub use channel::{LogEntry, MessageChannel, MessageDirection};
pub use connection::{RealtimeConnection, RtcConnection};
pub use events::{ConnState, EventSender, PeerEvent, PeerEventKind};
pub use types::{
    Description, DescriptionKind, FailureReason, NegotiationPhase, Role, SessionState,
    TokenPayload,
};
