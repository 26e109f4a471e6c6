//! Typed event queue between a connection and its session coordinator.
//!
//! Connection callbacks never touch session state directly; they push typed
//! events onto a bounded queue and the coordinator consumes them on its own
//! context. Each event carries the generation of the connection that emitted
//! it, so callbacks that fire after a reset are dropped instead of
//! resurrecting a torn-down session.

use tokio::sync::mpsc;

use crate::logger::log;

/// Platform connection state, mapped away from any one implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEventKind {
    /// The local offer/answer exists (ICE may still be gathering).
    LocalDescriptionReady,
    /// The local description is finalized and safe to encode into a token.
    IceGatheringComplete,
    StateChanged(ConnState),
    /// The duplex channel is usable, key exchange included.
    ChannelOpen,
    ChannelMessage(String),
    ChannelClosed,
    NegotiationFailed(String),
    /// Emitted by the watchdog when gathering stalls past the configured window.
    GatheringTimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub generation: u64,
    pub kind: PeerEventKind,
}

/// Sending half handed to a connection, stamped with its generation.
#[derive(Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::Sender<PeerEvent>,
}

impl EventSender {
    pub fn new(generation: u64, tx: mpsc::Sender<PeerEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues an event without blocking. A full queue drops the event; a
    /// dropped gathering event leaves the watchdog to fail the round, and a
    /// dropped message is lost like any unreliable delivery.
    pub fn emit(&self, kind: PeerEventKind) {
        let event = PeerEvent {
            generation: self.generation,
            kind,
        };
        if self.tx.try_send(event).is_err() {
            log("event queue full or closed, dropping event");
        }
    }
}
