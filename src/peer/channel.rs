//! Duplex message channel and the session message log.

use std::fmt;
use std::sync::Arc;

use crate::error::ChannelError;
use crate::peer::connection::RealtimeConnection;

/// Who produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// One chat message, in receipt/send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub direction: MessageDirection,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            MessageDirection::Inbound => write!(f, "Peer: {}", self.text),
            MessageDirection::Outbound => write!(f, "You: {}", self.text),
        }
    }
}

/// Thin send-side handle over an established connection. Exists only while
/// the session is `Connected`; dropped on any transition out of it.
pub struct MessageChannel<C: RealtimeConnection> {
    conn: Arc<C>,
}

impl<C: RealtimeConnection> MessageChannel<C> {
    pub(crate) fn new(conn: Arc<C>) -> Self {
        Self { conn }
    }

    /// Sends one text message. Ordering is delegated to the underlying
    /// reliable, ordered channel; nothing is buffered or reordered here.
    pub async fn send(&self, text: &str) -> Result<(), ChannelError> {
        self.conn.send_text(text).await
    }
}
