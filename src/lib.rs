//! pairlink: peer-to-peer session coordination without a rendezvous server.
//!
//! Two peers establish a direct, encrypted data channel by exchanging exactly
//! two opaque tokens over an out-of-band channel (QR code, clipboard, manual
//! entry). The initiator produces the offer token, the responder consumes it
//! and produces the answer token, the initiator consumes that, and the
//! channel opens. How the tokens travel is the host application's business.

pub mod codec;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;

pub use config::{ServerConfig, SessionConfig};
pub use error::{ChannelError, DecodeError, NegotiationError, SessionError};
pub use peer::channel::{LogEntry, MessageChannel, MessageDirection};
pub use peer::connection::{RealtimeConnection, RtcConnection};
pub use peer::events::{ConnState, EventSender, PeerEvent, PeerEventKind};
pub use peer::types::{
    Description, DescriptionKind, FailureReason, NegotiationPhase, Role, SessionState,
    TokenPayload,
};
pub use session::Session;

/// Session backed by the production webrtc connection.
pub type RtcSession = Session<RtcConnection>;
