use serde::{Deserialize, Serialize};

/// Which side of the exchange this peer plays. Assigned once per session and
/// immutable afterwards; a retry after reset starts a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Produces the first token (the offer).
    Initiator,
    /// Consumes the offer first and produces the counter-token (the answer).
    Responder,
}

/// Sub-state while a negotiation round is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Waiting for the platform to produce a local description.
    AwaitingLocalDescription,
    /// Local description exists, ICE gathering is still running.
    AwaitingIceCompletion,
    /// Gathering finished; the token may be produced exactly once.
    TokenReady,
    /// Initiator only: offer handed to the transport, waiting for the answer.
    AwaitingRemoteToken,
}

/// Why a session ended up in `SessionState::Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// ICE gathering never completed within the configured window.
    Timeout,
    /// The underlying transport reported a failure.
    Transport(String),
}

/// Tagged session state. Replaces the scattered boolean flags of callback
/// style implementations with a single observable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating { role: Role, phase: NegotiationPhase },
    Connected,
    Closed,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }
}

/// The offer/answer discriminant carried by every description and token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl DescriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptionKind::Offer => "offer",
            DescriptionKind::Answer => "answer",
        }
    }
}

/// A finalized connection description, ready to be encoded into a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

/// Description plus exchange metadata, the unit the codec works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub description: Description,
    /// Random hex id shared by both tokens of one exchange round.
    pub id: String,
    /// Unix timestamp of token creation.
    pub ts: i64,
}
