use thiserror::Error;

use crate::peer::types::SessionState;

/// An inbound token could not be turned back into a connection description.
/// Recovered locally by asking for a fresh token; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not base64, not gzip, or not a parseable payload.
    #[error("malformed negotiation token")]
    Malformed,
    /// Decoded fine but the payload carries no recognizable offer/answer kind.
    #[error("negotiation token has an unknown description kind")]
    UnknownKind,
}

/// Protocol-ordering violations and platform negotiation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// A remote description was applied out of order, e.g. an answer before
    /// any offer was produced, or a second description mid-session.
    #[error("remote description arrived out of order")]
    UnexpectedRemoteDescription,
    /// The negotiation round for this session already ran to completion.
    #[error("negotiation already completed for this session")]
    AlreadyNegotiated,
    /// The underlying connection primitive reported a failure.
    #[error("platform negotiation failure: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Send attempted while the session is not connected.
    #[error("data channel is not open")]
    NotOpen,
    #[error("send failed: {0}")]
    Send(String),
}

/// Errors surfaced by the session coordinator itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    /// The requested operation is not valid in the current session state.
    #[error("operation not permitted in state {0:?}")]
    InvalidState(SessionState),
    /// The connection event queue closed while waiting for progress.
    #[error("connection event queue closed")]
    EventQueueClosed,
}
