//! Session coordinator: the negotiation state machine.
//!
//! One `Session` owns one connection, zero-or-one message channel and the
//! chat log. Every transition happens here, driven either by a local call
//! (`start`, `join`, `produce_token`, `consume_token`, `reset`) or by a typed
//! event from the connection. Nothing else mutates session state.
//!
//! Token production deliberately waits for complete ICE gathering instead of
//! trickling candidates: the exchange is human-mediated (QR code, clipboard)
//! and slow anyway, so one atomic token per direction beats many small ones.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, watch};

use crate::codec;
use crate::config::SessionConfig;
use crate::error::{ChannelError, NegotiationError, SessionError};
use crate::logger::log;
use crate::peer::channel::{LogEntry, MessageChannel, MessageDirection};
use crate::peer::connection::RealtimeConnection;
use crate::peer::events::{ConnState, EventSender, PeerEvent, PeerEventKind};
use crate::peer::types::{
    DescriptionKind, FailureReason, NegotiationPhase, Role, SessionState, TokenPayload,
};

fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// One peer's side of a session, generic over the connection capability.
pub struct Session<C: RealtimeConnection> {
    config: SessionConfig,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: mpsc::Receiver<PeerEvent>,
    /// Bumped on every connection creation and on reset; events stamped with
    /// an older generation are ignored.
    generation: u64,
    conn: Option<Arc<C>>,
    channel: Option<MessageChannel<C>>,
    messages: Vec<LogEntry>,
    /// Exchange id shared by offer and answer token of one round.
    exchange_id: Option<String>,
    token_produced: bool,
    answer_applied: bool,
}

impl<C: RealtimeConnection> Session<C> {
    pub fn new(config: SessionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            state: SessionState::Idle,
            state_tx,
            events_tx,
            events_rx,
            generation: 0,
            conn: None,
            channel: None,
            messages: Vec::new(),
            exchange_id: None,
            token_produced: false,
            answer_applied: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Observable state for the UI layer; `Connected`, `Closed` and `Failed`
    /// notifications all arrive through this channel.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// The message log, oldest first. Re-readable at any time.
    pub fn messages(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        self.messages.iter()
    }

    /// SAS fingerprint of the channel keys, once key exchange completed.
    pub fn fingerprint(&self) -> Option<String> {
        self.conn.as_ref().and_then(|conn| conn.fingerprint())
    }

    /// Initiator entry point: creates the connection, opens the data channel
    /// and requests the local offer.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(self.state.clone()));
        }

        self.generation += 1;
        let sender = EventSender::new(self.generation, self.events_tx.clone());
        let conn = Arc::new(C::create(&self.config, sender.clone()).await?);

        if let Err(e) = Self::begin_offer(&conn, &self.config.channel_label).await {
            conn.close().await;
            return Err(e);
        }

        self.conn = Some(conn);
        self.exchange_id = None;
        self.token_produced = false;
        self.answer_applied = false;
        self.set_state(SessionState::Negotiating {
            role: Role::Initiator,
            phase: NegotiationPhase::AwaitingLocalDescription,
        });
        self.arm_gathering_watchdog(sender);
        Ok(())
    }

    /// Responder entry point: consumes the initiator's offer token and
    /// requests the local answer.
    pub async fn join(&mut self, token: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(self.state.clone()));
        }

        let payload = codec::decode(token)?;
        if payload.description.kind != DescriptionKind::Offer {
            // An answer is never the first token a responder sees
            return Err(NegotiationError::UnexpectedRemoteDescription.into());
        }
        log(&format!("joining exchange {}", payload.id));

        self.generation += 1;
        let sender = EventSender::new(self.generation, self.events_tx.clone());
        let conn = Arc::new(C::create(&self.config, sender.clone()).await?);

        if let Err(e) = Self::begin_answer(&conn, payload.description).await {
            conn.close().await;
            return Err(e);
        }

        self.conn = Some(conn);
        self.exchange_id = Some(payload.id);
        self.token_produced = false;
        self.answer_applied = false;
        self.set_state(SessionState::Negotiating {
            role: Role::Responder,
            phase: NegotiationPhase::AwaitingLocalDescription,
        });
        self.arm_gathering_watchdog(sender);
        Ok(())
    }

    /// Returns the encoded offer/answer for the out-of-band transport.
    /// Permitted exactly once, in `TokenReady`; the token always carries a
    /// finalized description because `TokenReady` is only entered after ICE
    /// gathering completed.
    pub async fn produce_token(&mut self) -> Result<String, SessionError> {
        if self.token_produced || self.state == SessionState::Connected {
            return Err(NegotiationError::AlreadyNegotiated.into());
        }

        let role = match self.state {
            SessionState::Negotiating {
                role,
                phase: NegotiationPhase::TokenReady,
            } => role,
            _ => return Err(SessionError::InvalidState(self.state.clone())),
        };

        let conn = self
            .conn
            .as_ref()
            .cloned()
            .ok_or_else(|| SessionError::InvalidState(self.state.clone()))?;
        let description = conn.local_description().await.ok_or_else(|| {
            SessionError::Negotiation(NegotiationError::Platform(
                "no finalized local description".into(),
            ))
        })?;

        let id = self.exchange_id.clone().unwrap_or_else(random_id);
        self.exchange_id = Some(id.clone());

        let payload = TokenPayload {
            description,
            id,
            ts: chrono::Utc::now().timestamp(),
        };
        let token = codec::encode(&payload);
        log(&format!("produced token, encoded length: {}", token.len()));

        self.token_produced = true;
        if role == Role::Initiator {
            // Round is now in flight; the next inbound token is the answer
            self.set_state(SessionState::Negotiating {
                role,
                phase: NegotiationPhase::AwaitingRemoteToken,
            });
        }
        Ok(token)
    }

    /// Initiator second round: applies the responder's answer token. The
    /// session then moves to `Connected` on the connection's own events.
    pub async fn consume_token(&mut self, token: &str) -> Result<(), SessionError> {
        let payload = codec::decode(token)?;

        if self.answer_applied || self.state == SessionState::Connected {
            return Err(NegotiationError::AlreadyNegotiated.into());
        }

        let in_second_round = matches!(
            self.state,
            SessionState::Negotiating {
                role: Role::Initiator,
                phase: NegotiationPhase::AwaitingRemoteToken,
            }
        );
        if !in_second_round || payload.description.kind != DescriptionKind::Answer {
            // Leaves the session exactly where it was
            return Err(NegotiationError::UnexpectedRemoteDescription.into());
        }

        let conn = self
            .conn
            .as_ref()
            .cloned()
            .ok_or(SessionError::Negotiation(
                NegotiationError::UnexpectedRemoteDescription,
            ))?;
        conn.set_remote_description(payload.description).await?;
        self.answer_applied = true;
        log("answer applied, waiting for the channel to open");
        Ok(())
    }

    /// Sends one text message over the open channel and records it in the
    /// log. Nothing is buffered: outside `Connected` this fails immediately.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        if self.state != SessionState::Connected {
            return Err(ChannelError::NotOpen);
        }
        let channel = self.channel.as_ref().ok_or(ChannelError::NotOpen)?;
        channel.send(text).await?;
        self.messages.push(LogEntry {
            direction: MessageDirection::Outbound,
            text: text.to_string(),
        });
        Ok(())
    }

    /// Tears everything down and returns to `Idle`. Safe to call at any
    /// point, including mid-gathering; the generation bump makes any event
    /// still in flight from the old connection a no-op. This is the only
    /// retry path; renegotiation in place is not supported.
    pub async fn reset(&mut self) {
        self.generation += 1;
        self.teardown().await;
        self.exchange_id = None;
        self.token_produced = false;
        self.answer_applied = false;
        self.messages.clear();
        self.set_state(SessionState::Idle);
    }

    /// Receives and applies the next connection event. Returns
    /// `EventQueueClosed` only if every sender is gone, which cannot happen
    /// while the session itself is alive.
    pub async fn process_next_event(&mut self) -> Result<(), SessionError> {
        let event = self
            .events_rx
            .recv()
            .await
            .ok_or(SessionError::EventQueueClosed)?;
        self.apply_event(event).await;
        Ok(())
    }

    /// Drives the event loop until the predicate holds. Callers wrap this in
    /// a timeout when the condition may never arrive.
    pub async fn wait_until(
        &mut self,
        pred: impl Fn(&Self) -> bool,
    ) -> Result<(), SessionError> {
        while !pred(self) {
            self.process_next_event().await?;
        }
        Ok(())
    }

    async fn begin_offer(conn: &Arc<C>, label: &str) -> Result<(), SessionError> {
        conn.open_data_channel(label).await?;
        conn.create_local_offer().await?;
        Ok(())
    }

    async fn begin_answer(
        conn: &Arc<C>,
        offer: crate::peer::types::Description,
    ) -> Result<(), SessionError> {
        conn.set_remote_description(offer).await?;
        conn.create_local_answer().await?;
        Ok(())
    }

    fn arm_gathering_watchdog(&self, events: EventSender) {
        if let Some(window) = self.config.gathering_timeout {
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                events.emit(PeerEventKind::GatheringTimedOut);
            });
        }
    }

    async fn apply_event(&mut self, event: PeerEvent) {
        if event.generation != self.generation {
            log("event from a previous connection generation, ignoring");
            return;
        }

        match event.kind {
            PeerEventKind::LocalDescriptionReady => {
                if let SessionState::Negotiating {
                    role,
                    phase: NegotiationPhase::AwaitingLocalDescription,
                } = self.state
                {
                    self.set_state(SessionState::Negotiating {
                        role,
                        phase: NegotiationPhase::AwaitingIceCompletion,
                    });
                }
            }

            PeerEventKind::IceGatheringComplete => {
                if let SessionState::Negotiating { role, phase } = self.state {
                    if matches!(
                        phase,
                        NegotiationPhase::AwaitingLocalDescription
                            | NegotiationPhase::AwaitingIceCompletion
                    ) {
                        self.set_state(SessionState::Negotiating {
                            role,
                            phase: NegotiationPhase::TokenReady,
                        });
                    }
                }
            }

            PeerEventKind::GatheringTimedOut => {
                if let SessionState::Negotiating { phase, .. } = self.state {
                    if matches!(
                        phase,
                        NegotiationPhase::AwaitingLocalDescription
                            | NegotiationPhase::AwaitingIceCompletion
                    ) {
                        log("ICE gathering timed out");
                        self.fail(FailureReason::Timeout).await;
                    }
                }
            }

            PeerEventKind::ChannelOpen => {
                if matches!(self.state, SessionState::Negotiating { .. }) {
                    if let Some(conn) = self.conn.as_ref().cloned() {
                        self.channel = Some(MessageChannel::new(conn));
                    }
                    self.set_state(SessionState::Connected);
                }
            }

            PeerEventKind::ChannelMessage(text) => {
                if self.state == SessionState::Connected {
                    self.messages.push(LogEntry {
                        direction: MessageDirection::Inbound,
                        text,
                    });
                } else {
                    log("channel message outside Connected, dropping");
                }
            }

            PeerEventKind::ChannelClosed => {
                if self.state == SessionState::Connected {
                    self.close_session().await;
                }
            }

            PeerEventKind::StateChanged(state) => match state {
                // The session counts as connected once the channel opened
                // (key exchange included), not on raw transport state.
                ConnState::Connected => log("transport reports connected"),
                ConnState::Failed => {
                    if matches!(self.state, SessionState::Negotiating { .. }) {
                        self.fail(FailureReason::Transport("connection failed".into()))
                            .await;
                    } else if self.state == SessionState::Connected {
                        self.close_session().await;
                    }
                }
                ConnState::Disconnected | ConnState::Closed => {
                    if matches!(
                        self.state,
                        SessionState::Negotiating { .. } | SessionState::Connected
                    ) {
                        self.close_session().await;
                    }
                }
                ConnState::New | ConnState::Connecting => {}
            },

            PeerEventKind::NegotiationFailed(reason) => {
                if matches!(
                    self.state,
                    SessionState::Negotiating { .. } | SessionState::Connected
                ) {
                    self.fail(FailureReason::Transport(reason)).await;
                }
            }
        }
    }

    async fn close_session(&mut self) {
        self.teardown().await;
        self.set_state(SessionState::Closed);
    }

    async fn fail(&mut self, reason: FailureReason) {
        self.teardown().await;
        self.set_state(SessionState::Failed(reason));
    }

    async fn teardown(&mut self) {
        self.channel = None;
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
    }

    fn set_state(&mut self, state: SessionState) {
        log(&format!("session state: {:?} -> {:?}", self.state, state));
        self.state = state.clone();
        // send_replace: the value must be stored even while no receiver is
        // subscribed, so a later watch_state() subscriber sees current state.
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::connection::RtcConnection;
    use crate::peer::types::Description;

    fn answer_token() -> String {
        codec::encode(&TokenPayload {
            description: Description {
                kind: DescriptionKind::Answer,
                sdp: "v=0\r\n".into(),
            },
            id: "deadbeefdeadbeef".into(),
            ts: 0,
        })
    }

    #[tokio::test]
    async fn produce_is_rejected_while_idle() {
        let mut session = Session::<RtcConnection>::new(SessionConfig::default());
        let err = session.produce_token().await.unwrap_err();
        assert_eq!(err, SessionError::InvalidState(SessionState::Idle));
    }

    #[tokio::test]
    async fn answer_before_offer_is_rejected_without_mutation() {
        let mut session = Session::<RtcConnection>::new(SessionConfig::default());
        let err = session.consume_token(&answer_token()).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Negotiation(NegotiationError::UnexpectedRemoteDescription)
        );
        assert_eq!(*session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn join_rejects_garbage_and_answer_tokens() {
        let mut session = Session::<RtcConnection>::new(SessionConfig::default());

        let err = session.join("@@@ not a token @@@").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Decode(crate::error::DecodeError::Malformed)
        );
        assert_eq!(*session.state(), SessionState::Idle);

        let err = session.join(&answer_token()).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Negotiation(NegotiationError::UnexpectedRemoteDescription)
        );
        assert_eq!(*session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let mut session = Session::<RtcConnection>::new(SessionConfig::default());
        session.reset().await;
        session.reset().await;
        assert_eq!(*session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn send_outside_connected_is_not_open() {
        let mut session = Session::<RtcConnection>::new(SessionConfig::default());
        assert_eq!(
            session.send_text("hello").await.unwrap_err(),
            ChannelError::NotOpen
        );
    }
}
